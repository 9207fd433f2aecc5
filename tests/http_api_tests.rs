// HTTP surface: header handling, error mapping and a create/list/delete round through
// the real router on an ephemeral port.

use std::sync::Arc;

use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};

use sojobo::bridge::TaskBridge;
use sojobo::permissions::{JsonPermissionStore, PermissionStore};
use sojobo::identity::ControllerAccess;
use sojobo::server::{router, AppState};
use sojobo::testing::{self, FakeRunner, FakeTransport, ADMIN_PASSWORD, ADMIN_USER, API_KEY};

struct Harness {
    base: String,
    client: reqwest::Client,
    transport: FakeTransport,
    store: Arc<JsonPermissionStore>,
}

fn basic(user: &str, password: &str) -> String {
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password)))
}

async fn start() -> Harness {
    let transport = FakeTransport::new();
    let models: Arc<Mutex<Vec<Value>>> =
        Arc::new(Mutex::new(vec![json!({"model": {"name": "dev-model", "uuid": "u-dev", "owner-tag": "user-admin"}})]));
    let listed = models.clone();
    transport.on("ModelManager.ListModels", move |_| Ok(json!({"user-models": listed.lock().clone()})));
    let created = models.clone();
    transport.on("ModelManager.CreateModel", move |call| {
        let name = call.request.params["name"].as_str().unwrap_or_default().to_string();
        let uuid = format!("u-{}", name);
        created.lock().push(json!({"model": {"name": name, "uuid": uuid, "owner-tag": call.request.params["owner-tag"]}}));
        Ok(json!({"name": name, "uuid": uuid}))
    });
    let destroyed = models.clone();
    transport.on("ModelManager.DestroyModels", move |call| {
        let tag = call.request.params["models"][0]["model-tag"].as_str().unwrap_or_default().to_string();
        destroyed.lock().retain(|m| format!("model-{}", m["model"]["uuid"].as_str().unwrap_or_default()) != tag);
        Ok(json!({"results": [{}]}))
    });

    let store = Arc::new(JsonPermissionStore::in_memory());
    let reg = testing::registry(&[("prod", "aws"), ("staging", "lxd")]);
    let services = testing::services(reg, store.clone(), &transport, &FakeRunner::new());
    let app = router(AppState::new(TaskBridge::new(services)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Harness { base: format!("http://{}", addr), client: reqwest::Client::new(), transport, store }
}

impl Harness {
    fn req(&self, method: reqwest::Method, path: &str, user: &str, password: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base, path))
            .header("api-key", API_KEY)
            .header("authorization", basic(user, password))
    }

    fn admin(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.req(method, path, ADMIN_USER, ADMIN_PASSWORD)
    }
}

#[tokio::test]
async fn root_reports_registered_controllers() {
    let h = start().await;
    let v: Value = h.client.get(format!("{}/", h.base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(v["name"], "sojobo");
    assert_eq!(v["controllers"], json!(["prod", "staging"]));
}

#[tokio::test]
async fn missing_api_key_is_a_bad_request() {
    let h = start().await;
    let resp = h
        .client
        .post(format!("{}/tengu/login", h.base))
        .header("authorization", basic(ADMIN_USER, ADMIN_PASSWORD))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn login_distinguishes_bad_credentials() {
    let h = start().await;
    let ok = h.admin(reqwest::Method::POST, "/tengu/login").send().await.unwrap();
    assert_eq!(ok.status(), 200);
    let body: Value = ok.json().await.unwrap();
    assert_eq!(body["result"]["admin"], true);

    h.transport.reject_login("eve");
    let bad = h.req(reqwest::Method::POST, "/tengu/login", "eve", "guess").send().await.unwrap();
    assert_eq!(bad.status(), 401);

    let wrong_key = h
        .client
        .post(format!("{}/tengu/login", h.base))
        .header("api-key", "nope")
        .header("authorization", basic(ADMIN_USER, ADMIN_PASSWORD))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_key.status(), 401);
}

#[tokio::test]
async fn hidden_controller_is_not_found() {
    let h = start().await;
    h.store.set_controller_access("prod", "bob", ControllerAccess::Login).await.unwrap();
    let resp = h.req(reqwest::Method::GET, "/tengu/controllers/staging", "bob", "pw").send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let resp = h.req(reqwest::Method::GET, "/tengu/controllers/prod/models/dev-model", "bob", "pw").send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "model does not exist");
}

#[tokio::test]
async fn model_create_list_delete() {
    let h = start().await;
    let created = h
        .admin(reqwest::Method::POST, "/tengu/controllers/prod/models")
        .json(&json!({"model": "new-model"}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 200);
    let body: Value = created.json().await.unwrap();
    assert_eq!(body["result"]["uuid"], "u-new-model");
    assert_eq!(body["result"]["access"], "admin");

    let again = h
        .admin(reqwest::Method::POST, "/tengu/controllers/prod/models")
        .json(&json!({"model": "new-model"}))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);

    let listed: Value = h.admin(reqwest::Method::GET, "/tengu/controllers/prod/models").send().await.unwrap().json().await.unwrap();
    let names: Vec<&str> = listed["result"].as_array().unwrap().iter().filter_map(|m| m["name"].as_str()).collect();
    assert_eq!(names, vec!["dev-model", "new-model"]);

    let deleted = h.admin(reqwest::Method::DELETE, "/tengu/controllers/prod/models/new-model").send().await.unwrap();
    assert_eq!(deleted.status(), 200);
    assert_eq!(h.store.get_model_access("prod", "new-model", ADMIN_USER).await.unwrap(), Default::default());
    // every request released what it opened
    assert_eq!(h.transport.open(), 0);
}

#[tokio::test]
async fn malformed_body_is_rejected_before_any_connection() {
    let h = start().await;
    let resp = h
        .admin(reqwest::Method::POST, "/tengu/controllers/prod/models")
        .header("content-type", "application/json")
        .body("{\"mdl\":")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(h.transport.connects(), 0);
}

#[tokio::test]
async fn controller_grants_by_superuser_only() {
    let h = start().await;
    h.transport.reply("Controller.ModifyControllerAccess", json!({"results": [{}]}));
    h.store.set_controller_access("prod", "bob", ControllerAccess::Login).await.unwrap();

    let denied = h
        .req(reqwest::Method::PUT, "/users/carol/controllers/prod", "bob", "pw")
        .json(&json!({"access": "login"}))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 403);

    let granted = h
        .admin(reqwest::Method::PUT, "/users/carol/controllers/prod")
        .json(&json!({"access": "add-model"}))
        .send()
        .await
        .unwrap();
    assert_eq!(granted.status(), 200);
    assert_eq!(h.store.get_controller_access("prod", "carol").await.unwrap(), ControllerAccess::AddModel);
}

#[tokio::test]
async fn account_lifecycle_over_http() {
    let h = start().await;
    h.transport.reply("UserManager.AddUser", json!({"results": [{}]}));
    h.transport.reply("UserManager.SetPassword", json!({"results": [{}]}));
    h.transport.reply("UserManager.RemoveUser", json!({"results": [{}]}));
    h.transport.reply("Controller.ModifyControllerAccess", json!({"results": [{}]}));

    let created = h.admin(reqwest::Method::POST, "/users").json(&json!({"username": "zed", "password": "pw"})).send().await.unwrap();
    assert_eq!(created.status(), 200);
    let denied = h.req(reqwest::Method::POST, "/users", "zed", "pw").json(&json!({"username": "yan", "password": "pw"})).send().await.unwrap();
    assert_eq!(denied.status(), 403);

    let granted = h.admin(reqwest::Method::PUT, "/users/zed/controllers/prod").json(&json!({"access": "login"})).send().await.unwrap();
    assert_eq!(granted.status(), 200);
    let listed: Value = h.admin(reqwest::Method::GET, "/users").send().await.unwrap().json().await.unwrap();
    assert_eq!(listed["result"][0]["name"], "zed");
    assert_eq!(listed["result"][0]["controllers"][0]["access"], "login");

    let changed = h.req(reqwest::Method::PUT, "/users/zed", "zed", "pw").json(&json!({"password": "n3w"})).send().await.unwrap();
    assert_eq!(changed.status(), 200);
    let own: Value = h.req(reqwest::Method::GET, "/users/zed", "zed", "pw").send().await.unwrap().json().await.unwrap();
    assert_eq!(own["result"]["name"], "zed");

    let removed = h.admin(reqwest::Method::DELETE, "/users/zed").send().await.unwrap();
    assert_eq!(removed.status(), 200);
    assert_eq!(h.store.get_controller_access("prod", "zed").await.unwrap(), ControllerAccess::None);
    assert_eq!(h.transport.open(), 0);
}

#[tokio::test]
async fn controller_removal_over_http() {
    let h = start().await;
    h.transport.reply("Controller.DestroyController", json!({}));
    h.store.set_controller_access("staging", "bob", ControllerAccess::Login).await.unwrap();

    let denied = h.req(reqwest::Method::DELETE, "/tengu/controllers/staging", "bob", "pw").send().await.unwrap();
    assert_eq!(denied.status(), 403);
    let removed = h.admin(reqwest::Method::DELETE, "/tengu/controllers/staging").send().await.unwrap();
    assert_eq!(removed.status(), 200);
    let v: Value = h.client.get(format!("{}/", h.base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(v["controllers"], json!(["prod"]));

    let bad = h.admin(reqwest::Method::POST, "/tengu/controllers").json(&json!({"controller": "edge", "type": "openstack"})).send().await.unwrap();
    assert_eq!(bad.status(), 400);
}
