// Dual-path invocation: session first, command fallback, single credential refresh.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use sojobo::error::AppError;
use sojobo::identity::{Credentials, IdentityToken, ModelAccess, RequestContext};
use sojobo::invoker::{CliScope, ProcessCall, SessionCall};
use sojobo::ops;
use sojobo::permissions::{JsonPermissionStore, PermissionStore};
use sojobo::remote::{RemoteError, RpcRequest};
use sojobo::testing::{self, FakeRunner, FakeTransport, ADMIN_PASSWORD, ADMIN_USER};

const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIB6oQ0g7PCEDbF2R5ofg6AAAAAAAAAAAAAAAAAAAAAAA bob@laptop";

fn admin() -> IdentityToken { IdentityToken::administrator(ADMIN_USER, ADMIN_PASSWORD) }

fn transport() -> FakeTransport {
    let t = FakeTransport::new();
    t.reply(
        "ModelManager.ListModels",
        json!({"user-models": [{"model": {"name": "dev-model", "uuid": "u-dev", "owner-tag": "user-admin"}}]}),
    );
    t
}

fn ctx(transport: &FakeTransport, runner: &FakeRunner) -> RequestContext {
    let reg = testing::registry(&[("prod", "maas")]);
    RequestContext::new(testing::services(reg, Arc::new(JsonPermissionStore::in_memory()), transport, runner))
}

#[tokio::test]
async fn unsupported_session_call_falls_back_to_command() {
    let transport = transport();
    let runner = FakeRunner::new();
    runner.output("ssh-keys", &format!("Keys used in model: admin/dev-model\n{}\n", KEY));
    let ctx = ctx(&transport, &runner);

    let keys = ops::ssh_keys::list(&ctx, &admin(), "prod", "dev-model").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].comment.as_deref(), Some("bob@laptop"));

    assert_eq!(transport.calls_to("KeyManager.ListKeys"), 1);
    let runs = runner.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].target.controller, "prod");
    assert_eq!(runs[0].target.model.as_deref(), Some("dev-model"));
    assert_eq!(runs[0].account, ADMIN_USER);
    assert_eq!(runs[0].command_line(), vec!["ssh-keys", "--full", "-m", "prod:dev-model"]);
}

#[tokio::test]
async fn session_result_is_used_when_supported() {
    let transport = transport();
    transport.reply("KeyManager.ListKeys", json!({"results": [{"result": [KEY]}]}));
    let runner = FakeRunner::new();
    let ctx = ctx(&transport, &runner);

    let keys = ops::ssh_keys::list(&ctx, &admin(), "prod", "dev-model").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(runner.runs().is_empty());
}

#[tokio::test]
async fn stale_primary_is_retried_exactly_once() {
    let transport = transport();
    transport.fail("KeyManager.ListKeys", RemoteError::StaleCredential("login expired".into()));
    let runner = FakeRunner::new();
    let ctx = ctx(&transport, &runner);

    let err = ops::ssh_keys::list(&ctx, &admin(), "prod", "dev-model").await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized { .. }), "{err:?}");
    assert_eq!(transport.calls_to("KeyManager.ListKeys"), 2);
    assert!(runner.runs().is_empty());
    // controller, model, and the one reconnect of the model session
    assert_eq!(transport.connects(), 3);
}

#[tokio::test]
async fn stale_fallback_is_retried_exactly_once() {
    let transport = transport();
    let runner = FakeRunner::new();
    runner.on("ssh-keys", |_| Err(RemoteError::StaleCredential("cannot log in".into())));
    let ctx = ctx(&transport, &runner);

    let err = ops::ssh_keys::list(&ctx, &admin(), "prod", "dev-model").await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized { .. }), "{err:?}");
    assert_eq!(runner.runs_of("ssh-keys"), 2);
    assert_eq!(transport.calls_to("KeyManager.ListKeys"), 1);
}

#[tokio::test]
async fn one_refresh_is_shared_by_both_paths() {
    let transport = transport();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    // stale the first time, then unsupported once the credential was refreshed
    transport.on("KeyManager.ListKeys", move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(RemoteError::StaleCredential("login expired".into()))
        } else {
            Err(RemoteError::Unsupported("no KeyManager facade".into()))
        }
    });
    let runner = FakeRunner::new();
    runner.on("ssh-keys", |_| Err(RemoteError::StaleCredential("cannot log in".into())));
    let ctx = ctx(&transport, &runner);

    let err = ops::ssh_keys::list(&ctx, &admin(), "prod", "dev-model").await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized { .. }), "{err:?}");
    assert_eq!(transport.calls_to("KeyManager.ListKeys"), 2);
    // the fallback found the budget spent and did not refresh again
    assert_eq!(runner.runs_of("ssh-keys"), 1);
    assert_eq!(transport.connects(), 3);
}

#[tokio::test]
async fn refresh_reconnects_as_administrator() {
    let transport = transport();
    let store = Arc::new(JsonPermissionStore::in_memory());
    store.set_model_access("prod", "dev-model", "bob", ModelAccess::Admin).await.unwrap();
    transport.on("KeyManager.ListKeys", |call| {
        if call.account == "bob" {
            Err(RemoteError::StaleCredential("password changed".into()))
        } else {
            Ok(json!({"results": [{"result": [KEY]}]}))
        }
    });
    let reg = testing::registry(&[("prod", "maas")]);
    let runner = FakeRunner::new();
    let ctx = RequestContext::new(testing::services(reg, store, &transport, &runner));
    let bob = IdentityToken::new(&Credentials::new("bob", "pw"), ADMIN_USER, ADMIN_PASSWORD);

    let keys = ops::ssh_keys::list(&ctx, &bob, "prod", "dev-model").await.unwrap();
    assert_eq!(keys.len(), 1);
    let last = transport.connected_as().last().cloned().unwrap();
    assert_eq!(last, (ADMIN_USER.to_string(), Some("u-dev".to_string())));
}

#[tokio::test]
async fn fallback_unsupported_surfaces_as_remote_failure() {
    let transport = transport();
    let runner = FakeRunner::new();
    runner.on("frobnicate", |_| Err(RemoteError::Unsupported("no such command".into())));
    let ctx = ctx(&transport, &runner);
    let auth = ops::authorize(&ctx, &admin(), "prod", Some("dev-model")).await.unwrap();
    let msession = auth.model().unwrap();

    let primary = SessionCall::new("frobnicate", RpcRequest::new("Frob", 1, "Nicate", json!({})), |_| Ok(()));
    let fallback = ProcessCall::text(&["frobnicate"], |_| Ok(())).controller_scoped();
    assert_eq!(fallback.scope, CliScope::Controller);
    let err = ctx.invoker().invoke(msession, primary, fallback).await.unwrap_err();
    assert!(matches!(err, AppError::RemoteCallFailed { .. }), "{err:?}");
    assert_eq!(runner.runs()[0].command_line(), vec!["frobnicate", "-c", "prod"]);
}

#[tokio::test]
async fn domain_failures_are_not_retried() {
    let transport = transport();
    transport.fail("KeyManager.ListKeys", RemoteError::Failed("quota exceeded".into()));
    let runner = FakeRunner::new();
    let ctx = ctx(&transport, &runner);

    let err = ops::ssh_keys::list(&ctx, &admin(), "prod", "dev-model").await.unwrap_err();
    assert_eq!(err, AppError::remote("quota exceeded"));
    assert_eq!(transport.calls_to("KeyManager.ListKeys"), 1);
    assert!(runner.runs().is_empty());
}
