// Session lifecycle through the connection manager and the task bridge.

use std::sync::Arc;

use serde_json::json;

use sojobo::bridge::TaskBridge;
use sojobo::error::AppError;
use sojobo::identity::{ControllerAccess, Credentials, IdentityToken, RequestContext};
use sojobo::ops;
use sojobo::permissions::{JsonPermissionStore, PermissionStore};
use sojobo::session::SessionState;
use sojobo::testing::{self, FakeRunner, FakeTransport, ADMIN_PASSWORD, ADMIN_USER};

fn admin() -> IdentityToken { IdentityToken::administrator(ADMIN_USER, ADMIN_PASSWORD) }

fn ctx(transport: &FakeTransport) -> RequestContext {
    let reg = testing::registry(&[("prod", "aws")]);
    RequestContext::new(testing::services(reg, Arc::new(JsonPermissionStore::in_memory()), transport, &FakeRunner::new()))
}

#[tokio::test]
async fn reopen_closes_previous_connection_exactly_once() {
    let transport = FakeTransport::new();
    let ctx = ctx(&transport);
    let cm = ctx.connections();

    let session = cm.open_controller(&admin(), "prod", ControllerAccess::Superuser).await.unwrap();
    assert_eq!(session.state().await, SessionState::Open);
    assert_eq!((transport.connects(), transport.closes()), (1, 0));

    cm.reopen(&session, &admin()).await.unwrap();
    assert_eq!((transport.connects(), transport.closes()), (2, 1));
    assert_eq!(session.state().await, SessionState::Open);

    cm.reauthenticate(&session).await.unwrap();
    assert_eq!((transport.connects(), transport.closes()), (3, 2));
    assert_eq!(transport.open(), 1);
}

#[tokio::test]
async fn close_is_idempotent() {
    let transport = FakeTransport::new();
    let ctx = ctx(&transport);
    let cm = ctx.connections();

    let session = cm.open_controller(&admin(), "prod", ControllerAccess::Superuser).await.unwrap();
    assert!(cm.close(&session).await);
    assert!(!cm.close(&session).await);
    assert_eq!(transport.closes(), 1);
    assert_eq!(session.state().await, SessionState::Closed);
    // the sweep at the end of the request finds nothing left to release
    assert_eq!(cm.close_all().await, 0);
    assert_eq!(cm.close_all().await, 0);
    assert_eq!(transport.closes(), 1);
}

#[tokio::test]
async fn closing_a_session_that_failed_to_open_is_harmless() {
    let transport = FakeTransport::new();
    transport.reject_login("bob");
    let ctx = ctx(&transport);
    let cm = ctx.connections();

    let bob = IdentityToken::new(&Credentials::new("bob", "pw"), ADMIN_USER, ADMIN_PASSWORD);
    let err = cm.open_controller(&bob, "prod", ControllerAccess::Login).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized { .. }));
    assert_eq!(cm.tracked(), 1);
    assert_eq!(cm.close_all().await, 0);
    assert_eq!(transport.closes(), 0);
}

#[tokio::test]
async fn closed_session_is_never_reused() {
    let transport = FakeTransport::new();
    let ctx = ctx(&transport);
    let cm = ctx.connections();

    let session = cm.open_controller(&admin(), "prod", ControllerAccess::Superuser).await.unwrap();
    cm.close(&session).await;
    let err = cm.reopen(&session, &admin()).await.unwrap_err();
    assert!(matches!(err, AppError::ConnectionFailed { .. }));
    assert_eq!(transport.connects(), 1);
}

#[tokio::test]
async fn bridge_closes_every_session_on_success_and_failure() {
    let transport = FakeTransport::new();
    transport.reply(
        "ModelManager.ListModels",
        json!({"user-models": [{"model": {"name": "dev-model", "uuid": "u-dev", "owner-tag": "user-admin"}}]}),
    );
    let reg = testing::registry(&[("prod", "aws")]);
    let bridge = TaskBridge::new(testing::services(reg, Arc::new(JsonPermissionStore::in_memory()), &transport, &FakeRunner::new()));

    let opened = bridge
        .run_request(|ctx| async move {
            let auth = ops::authorize(&ctx, &admin(), "prod", Some("dev-model")).await?;
            Ok(auth.model()?.uuid().to_string())
        })
        .await
        .unwrap();
    assert_eq!(opened, "u-dev");
    assert_eq!(transport.connects(), 2);
    assert_eq!(transport.open(), 0);

    let err = bridge
        .run_request(|ctx| async move {
            let _auth = ops::authorize(&ctx, &admin(), "prod", None).await?;
            Err::<(), _>(AppError::remote("boom"))
        })
        .await
        .unwrap_err();
    assert_eq!(err, AppError::remote("boom"));
    assert_eq!(transport.connects(), 3);
    assert_eq!(transport.open(), 0);
}

#[tokio::test]
async fn bridge_closes_sessions_when_the_work_panics() {
    let transport = FakeTransport::new();
    let reg = testing::registry(&[("prod", "aws")]);
    let bridge = TaskBridge::new(testing::services(reg, Arc::new(JsonPermissionStore::in_memory()), &transport, &FakeRunner::new()));

    let err = bridge
        .run_request(|ctx| async move {
            let _auth = ops::authorize(&ctx, &admin(), "prod", None).await?;
            if ctx.request_id().is_empty() {
                return Ok(());
            }
            panic!("handler bug");
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Internal { .. }));
    assert_eq!(transport.open(), 0);
}

#[tokio::test]
async fn cached_grant_survives_in_store_after_request() {
    let store = Arc::new(JsonPermissionStore::in_memory());
    store.set_controller_access("prod", "bob", ControllerAccess::Login).await.unwrap();
    let transport = FakeTransport::new();
    let reg = testing::registry(&[("prod", "aws")]);
    let services = testing::services(reg, store.clone(), &transport, &FakeRunner::new());
    let ctx = RequestContext::new(services);
    let bob = IdentityToken::new(&Credentials::new("bob", "pw"), ADMIN_USER, ADMIN_PASSWORD);
    // UserInfo is unsupported on the fake, so the cached level stands
    let auth = ops::authorize(&ctx, &bob, "prod", None).await.unwrap();
    assert_eq!(auth.controller.access(), ControllerAccess::Login);
}
