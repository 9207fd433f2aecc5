//!
//! sojobo HTTP server
//! ------------------
//! Thin axum routing layer. Every handler reads the `api-key` header and HTTP basic
//! credentials, then hands the operation to the task bridge, which authenticates,
//! runs it and closes the request's sessions. Errors map to their HTTP status with a
//! JSON body `{"status": "error", "code", "message"}`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::bridge::TaskBridge;
use crate::error::{AppError, AppResult};
use crate::identity::{Credentials, IdentityToken, RequestContext};
use crate::ops;

#[derive(Clone)]
pub struct AppState {
    bridge: TaskBridge,
}

impl AppState {
    pub fn new(bridge: TaskBridge) -> Self { Self { bridge } }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_body())).into_response()
    }
}

fn respond<T: Serialize>(op: &'static str, result: AppResult<T>) -> Response {
    match result {
        Ok(v) => (StatusCode::OK, Json(json!({"status": "ok", "result": v}))).into_response(),
        Err(e) => {
            if e.http_status() >= 500 {
                warn!(target: "sojobo::http", "{} failed: {}", op, e);
            } else {
                info!(target: "sojobo::http", "{} rejected: {} ({})", op, e.code_str(), e);
            }
            e.into_response()
        }
    }
}

/// `api-key` header plus `Authorization: Basic base64(user:password)`.
pub fn request_credentials(headers: &HeaderMap) -> AppResult<(String, Credentials)> {
    let api_key = headers
        .get("api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::invalid("missing api-key header"))?
        .to_string();
    let basic = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or_else(|| AppError::unauthorized("missing basic authorization"))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(basic.trim())
        .map_err(|_| AppError::unauthorized("malformed basic authorization"))?;
    let text = String::from_utf8(decoded).map_err(|_| AppError::unauthorized("malformed basic authorization"))?;
    let (user, password) = text.split_once(':').ok_or_else(|| AppError::unauthorized("malformed basic authorization"))?;
    Ok((api_key, Credentials::new(user, password)))
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|e| AppError::invalid(format!("invalid request body: {}", e)))
}

/// Authenticate, then run `op` inside the bridge.
async fn dispatch<T, F, Fut>(state: &AppState, headers: &HeaderMap, name: &'static str, op: F) -> Response
where
    F: FnOnce(Arc<RequestContext>, IdentityToken) -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let (api_key, creds) = match request_credentials(headers) {
        Ok(c) => c,
        Err(e) => return respond::<()>(name, Err(e)),
    };
    let result = state
        .bridge
        .run_request(move |ctx| async move {
            let token = ctx.gate().authenticate(&api_key, &creds).await?;
            op(ctx, token).await
        })
        .await;
    respond(name, result)
}

pub fn router(state: AppState) -> Router {
    let model = "/tengu/controllers/{controller}/models/{model}";
    Router::new()
        .route("/", get(status))
        .route("/tengu/login", post(login))
        .route("/tengu/controllers", get(list_controllers).post(create_controller))
        .route("/tengu/controllers/{controller}", get(get_controller).delete(delete_controller))
        .route("/tengu/controllers/{controller}/models", get(list_models).post(create_model))
        .route(model, get(get_model).delete(delete_model))
        .route(&format!("{model}/sshkey"), get(list_ssh_keys).post(add_ssh_key).delete(remove_ssh_key))
        .route(&format!("{model}/applications"), get(list_applications).post(deploy_application))
        .route(&format!("{model}/applications/{{application}}"), get(get_application).delete(remove_application))
        .route(&format!("{model}/applications/{{application}}/units"), get(list_units).post(add_unit))
        .route(&format!("{model}/applications/{{application}}/units/{{unit}}"), get(get_unit).delete(remove_unit))
        .route(&format!("{model}/machines"), get(list_machines).post(add_machine))
        .route(&format!("{model}/machines/{{machine}}"), get(get_machine).delete(remove_machine))
        .route(&format!("{model}/relations"), get(list_relations).put(add_relation))
        .route(&format!("{model}/relations/{{application}}"), get(application_relations))
        .route(&format!("{model}/relations/{{application}}/{{other}}"), axum::routing::delete(remove_relation))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{user}", get(get_user).put(change_password).delete(delete_user))
        .route("/users/{user}/controllers", get(user_controllers))
        .route("/users/{user}/controllers/{controller}", put(grant_controller))
        .route("/users/{user}/controllers/{controller}/models", put(grant_models))
        .route("/users/{user}/controllers/{controller}/models/{model}", get(user_model_access).delete(revoke_model))
        .route("/users/{user}/ssh-keys", get(user_ssh_keys))
        .with_state(state)
}

pub async fn serve(bridge: TaskBridge, http_port: u16) -> anyhow::Result<()> {
    let app = router(AppState::new(bridge));
    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!(target: "sojobo::http", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let controllers = state.bridge.services().registry.names();
    Json(json!({"name": "sojobo", "version": env!("CARGO_PKG_VERSION"), "status": "ok", "controllers": controllers}))
}

async fn login(State(state): State<AppState>, headers: HeaderMap) -> Response {
    dispatch(&state, &headers, "login", |_ctx, token| async move { Ok(json!({"account": token.account(), "admin": token.is_admin()})) }).await
}

// ---- controllers and models

async fn list_controllers(State(state): State<AppState>, headers: HeaderMap) -> Response {
    dispatch(&state, &headers, "list controllers", |ctx, token| async move { ops::controllers::list(&ctx, &token).await }).await
}

async fn get_controller(State(state): State<AppState>, headers: HeaderMap, Path(controller): Path<String>) -> Response {
    dispatch(&state, &headers, "get controller", move |ctx, token| async move { ops::controllers::get(&ctx, &token, &controller).await }).await
}

async fn create_controller(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let body: ops::controllers::NewController = match parse_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "create controller", move |ctx, token| async move { ops::controllers::create(&ctx, &token, &body).await }).await
}

async fn delete_controller(State(state): State<AppState>, headers: HeaderMap, Path(controller): Path<String>) -> Response {
    dispatch(&state, &headers, "delete controller", move |ctx, token| async move { ops::controllers::delete(&ctx, &token, &controller).await }).await
}

async fn list_models(State(state): State<AppState>, headers: HeaderMap, Path(controller): Path<String>) -> Response {
    dispatch(&state, &headers, "list models", move |ctx, token| async move { ops::models::list(&ctx, &token, &controller).await }).await
}

#[derive(Debug, Deserialize)]
struct CreateModelBody {
    model: String,
    #[serde(default, rename = "ssh-key")]
    ssh_key: Option<String>,
}

async fn create_model(State(state): State<AppState>, headers: HeaderMap, Path(controller): Path<String>, body: Bytes) -> Response {
    let body: CreateModelBody = match parse_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "create model", move |ctx, token| async move {
        ops::models::create(&ctx, &token, &controller, &body.model, body.ssh_key.as_deref()).await
    })
    .await
}

async fn get_model(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>) -> Response {
    dispatch(&state, &headers, "get model", move |ctx, token| async move { ops::models::info(&ctx, &token, &controller, &model).await }).await
}

async fn delete_model(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>) -> Response {
    dispatch(&state, &headers, "delete model", move |ctx, token| async move { ops::models::delete(&ctx, &token, &controller, &model).await }).await
}

// ---- ssh keys

#[derive(Debug, Deserialize)]
struct SshKeyBody {
    #[serde(rename = "ssh-key")]
    ssh_key: String,
}

async fn list_ssh_keys(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>) -> Response {
    dispatch(&state, &headers, "list ssh keys", move |ctx, token| async move { ops::ssh_keys::list(&ctx, &token, &controller, &model).await }).await
}

async fn add_ssh_key(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>, body: Bytes) -> Response {
    let body: SshKeyBody = match parse_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "add ssh key", move |ctx, token| async move {
        ops::ssh_keys::add(&ctx, &token, &controller, &model, &body.ssh_key).await
    })
    .await
}

async fn remove_ssh_key(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>, body: Bytes) -> Response {
    let body: SshKeyBody = match parse_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "remove ssh key", move |ctx, token| async move {
        ops::ssh_keys::remove(&ctx, &token, &controller, &model, &body.ssh_key).await
    })
    .await
}

// ---- applications, units, relations

async fn list_applications(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>) -> Response {
    dispatch(&state, &headers, "list applications", move |ctx, token| async move {
        ops::applications::list(&ctx, &token, &controller, &model).await
    })
    .await
}

async fn deploy_application(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>, body: Bytes) -> Response {
    let req: ops::applications::DeployRequest = match parse_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "deploy application", move |ctx, token| async move {
        ops::applications::deploy(&ctx, &token, &controller, &model, &req).await
    })
    .await
}

async fn get_application(State(state): State<AppState>, headers: HeaderMap, Path((controller, model, app)): Path<(String, String, String)>) -> Response {
    dispatch(&state, &headers, "get application", move |ctx, token| async move {
        ops::applications::get(&ctx, &token, &controller, &model, &app).await
    })
    .await
}

async fn remove_application(State(state): State<AppState>, headers: HeaderMap, Path((controller, model, app)): Path<(String, String, String)>) -> Response {
    dispatch(&state, &headers, "remove application", move |ctx, token| async move {
        ops::applications::remove(&ctx, &token, &controller, &model, &app).await
    })
    .await
}

async fn list_units(State(state): State<AppState>, headers: HeaderMap, Path((controller, model, app)): Path<(String, String, String)>) -> Response {
    dispatch(&state, &headers, "list units", move |ctx, token| async move {
        ops::applications::units(&ctx, &token, &controller, &model, &app).await
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
struct TargetBody {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    series: Option<String>,
}

fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> AppResult<T> {
    if body.iter().all(|b| b.is_ascii_whitespace()) { Ok(T::default()) } else { parse_body(body) }
}

async fn add_unit(State(state): State<AppState>, headers: HeaderMap, Path((controller, model, app)): Path<(String, String, String)>, body: Bytes) -> Response {
    let body: TargetBody = match optional_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "add unit", move |ctx, token| async move {
        ops::applications::add_unit(&ctx, &token, &controller, &model, &app, body.target.as_deref()).await
    })
    .await
}

async fn get_unit(State(state): State<AppState>, headers: HeaderMap, Path((controller, model, app, unit)): Path<(String, String, String, String)>) -> Response {
    dispatch(&state, &headers, "get unit", move |ctx, token| async move {
        ops::applications::unit(&ctx, &token, &controller, &model, &app, &unit).await
    })
    .await
}

async fn remove_unit(State(state): State<AppState>, headers: HeaderMap, Path((controller, model, app, unit)): Path<(String, String, String, String)>) -> Response {
    dispatch(&state, &headers, "remove unit", move |ctx, token| async move {
        ops::applications::remove_unit(&ctx, &token, &controller, &model, &app, &unit).await
    })
    .await
}

async fn list_relations(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>) -> Response {
    dispatch(&state, &headers, "list relations", move |ctx, token| async move {
        ops::applications::relations(&ctx, &token, &controller, &model, None).await
    })
    .await
}

async fn application_relations(State(state): State<AppState>, headers: HeaderMap, Path((controller, model, app)): Path<(String, String, String)>) -> Response {
    dispatch(&state, &headers, "application relations", move |ctx, token| async move {
        ops::applications::relations(&ctx, &token, &controller, &model, Some(&app)).await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct RelationBody {
    app1: String,
    app2: String,
}

async fn add_relation(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>, body: Bytes) -> Response {
    let body: RelationBody = match parse_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "add relation", move |ctx, token| async move {
        ops::applications::add_relation(&ctx, &token, &controller, &model, &body.app1, &body.app2).await
    })
    .await
}

async fn remove_relation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((controller, model, app1, app2)): Path<(String, String, String, String)>,
) -> Response {
    dispatch(&state, &headers, "remove relation", move |ctx, token| async move {
        ops::applications::remove_relation(&ctx, &token, &controller, &model, &app1, &app2).await
    })
    .await
}

// ---- machines

async fn list_machines(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>) -> Response {
    dispatch(&state, &headers, "list machines", move |ctx, token| async move { ops::machines::list(&ctx, &token, &controller, &model).await }).await
}

async fn add_machine(State(state): State<AppState>, headers: HeaderMap, Path((controller, model)): Path<(String, String)>, body: Bytes) -> Response {
    let body: TargetBody = match optional_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "add machine", move |ctx, token| async move {
        ops::machines::add(&ctx, &token, &controller, &model, body.series.as_deref()).await
    })
    .await
}

async fn get_machine(State(state): State<AppState>, headers: HeaderMap, Path((controller, model, machine)): Path<(String, String, String)>) -> Response {
    dispatch(&state, &headers, "get machine", move |ctx, token| async move {
        ops::machines::get(&ctx, &token, &controller, &model, &machine).await
    })
    .await
}

async fn remove_machine(State(state): State<AppState>, headers: HeaderMap, Path((controller, model, machine)): Path<(String, String, String)>) -> Response {
    dispatch(&state, &headers, "remove machine", move |ctx, token| async move {
        ops::machines::remove(&ctx, &token, &controller, &model, &machine).await
    })
    .await
}

// ---- users

#[derive(Debug, Deserialize)]
struct AccessBody {
    access: String,
}

#[derive(Debug, Deserialize)]
struct ModelGrantsBody {
    models: Vec<ops::users::ModelGrant>,
}

#[derive(Deserialize)]
struct PasswordBody {
    password: String,
}

async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> Response {
    dispatch(&state, &headers, "list users", move |ctx, token| async move { ops::users::list_users(&ctx, &token).await }).await
}

async fn create_user(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let body: ops::users::NewUser = match parse_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "create user", move |ctx, token| async move { ops::users::create_user(&ctx, &token, &body).await }).await
}

async fn get_user(State(state): State<AppState>, headers: HeaderMap, Path(user): Path<String>) -> Response {
    dispatch(&state, &headers, "get user", move |ctx, token| async move { ops::users::get_user(&ctx, &token, &user).await }).await
}

async fn change_password(State(state): State<AppState>, headers: HeaderMap, Path(user): Path<String>, body: Bytes) -> Response {
    let body: PasswordBody = match parse_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "change password", move |ctx, token| async move {
        ops::users::change_password(&ctx, &token, &user, &body.password).await
    })
    .await
}

async fn delete_user(State(state): State<AppState>, headers: HeaderMap, Path(user): Path<String>) -> Response {
    dispatch(&state, &headers, "delete user", move |ctx, token| async move { ops::users::delete_user(&ctx, &token, &user).await }).await
}

async fn user_controllers(State(state): State<AppState>, headers: HeaderMap, Path(user): Path<String>) -> Response {
    dispatch(&state, &headers, "user controllers", move |ctx, token| async move { ops::users::user_records(&ctx, &token, &user).await }).await
}

async fn grant_controller(State(state): State<AppState>, headers: HeaderMap, Path((user, controller)): Path<(String, String)>, body: Bytes) -> Response {
    let body: AccessBody = match parse_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "grant controller access", move |ctx, token| async move {
        ops::users::grant_controller(&ctx, &token, &user, &controller, &body.access).await
    })
    .await
}

async fn grant_models(State(state): State<AppState>, headers: HeaderMap, Path((user, controller)): Path<(String, String)>, body: Bytes) -> Response {
    let body: ModelGrantsBody = match parse_body(&body) { Ok(b) => b, Err(e) => return e.into_response() };
    dispatch(&state, &headers, "grant model access", move |ctx, token| async move {
        ops::users::grant_models(&ctx, &token, &user, &controller, &body.models).await
    })
    .await
}

async fn user_model_access(State(state): State<AppState>, headers: HeaderMap, Path((user, controller, model)): Path<(String, String, String)>) -> Response {
    dispatch(&state, &headers, "user model access", move |ctx, token| async move {
        ops::users::model_access(&ctx, &token, &user, &controller, &model).await
    })
    .await
}

async fn revoke_model(State(state): State<AppState>, headers: HeaderMap, Path((user, controller, model)): Path<(String, String, String)>) -> Response {
    dispatch(&state, &headers, "revoke model access", move |ctx, token| async move {
        ops::users::revoke_model(&ctx, &token, &user, &controller, &model).await
    })
    .await
}

async fn user_ssh_keys(State(state): State<AppState>, headers: HeaderMap, Path(user): Path<String>) -> Response {
    dispatch(&state, &headers, "user ssh keys", move |ctx, token| async move { ops::ssh_keys::user_keys(&ctx, &token, &user).await }).await
}
