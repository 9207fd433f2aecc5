//! Models: list, inspect, create and destroy.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::status::{self, ModelStatus};
use super::{authorize, check_bulk, require_controller, require_model};
use crate::cluster::user_tag;
use crate::error::{AppError, AppResult};
use crate::identity::{ControllerAccess, IdentityToken, ModelAccess, RequestContext};
use crate::invoker::{ProcessCall, SessionCall};
use crate::permissions::UserAccess;
use crate::remote::RpcRequest;
use crate::session::{ControllerSession, ModelSummary, Session};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelView {
    pub name: String,
    pub uuid: String,
    pub owner: String,
    pub access: ModelAccess,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub uuid: String,
    pub controller: String,
    pub access: ModelAccess,
    pub status: ModelStatus,
    pub users: Vec<UserAccess<ModelAccess>>,
}

fn summaries_from_api(v: &Value) -> Vec<ModelSummary> {
    v.get("user-models").and_then(Value::as_array).into_iter().flatten().filter_map(ModelSummary::from_listing).collect()
}

/// `juju models --format json`: `{"models": [{"name": "admin/dev", "short-name": "dev", "model-uuid": ..}]}`.
fn summaries_from_cli(v: &Value) -> Vec<ModelSummary> {
    v.get("models")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|m| {
            let full = m.get("name")?.as_str()?;
            let short = m.get("short-name").and_then(Value::as_str).unwrap_or_else(|| full.rsplit('/').next().unwrap_or(full));
            Some(ModelSummary {
                name: short.to_string(),
                uuid: m.get("model-uuid")?.as_str()?.to_string(),
                owner: m.get("owner").and_then(Value::as_str).unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Live model listing through the invoker (the resolver uses the session directly).
pub async fn list_remote(ctx: &RequestContext, controller: &ControllerSession, account: &str) -> AppResult<Vec<ModelSummary>> {
    let primary = SessionCall::new(
        "list models",
        RpcRequest::new("ModelManager", 5, "ListModels", json!({"tag": user_tag(account)})),
        |v| Ok(summaries_from_api(&v)),
    );
    let fallback = ProcessCall::json(&["models"], |v| Ok(summaries_from_cli(&v))).controller_scoped();
    ctx.invoker().invoke(controller, primary, fallback).await
}

/// Models on `controller` the caller can see, with the caller's cached level.
pub async fn visible_models(ctx: &RequestContext, token: &IdentityToken, controller: &ControllerSession) -> AppResult<Vec<ModelView>> {
    let all = list_remote(ctx, controller, token.account()).await?;
    let resolver = ctx.resolver();
    let mut out = Vec::new();
    for m in all {
        let access = if controller.access() == ControllerAccess::Superuser {
            ModelAccess::Admin
        } else {
            resolver.cached_model_access(token, controller.name(), &m.name).await?
        };
        if access.is_valid() {
            out.push(ModelView { name: m.name, uuid: m.uuid, owner: m.owner, access });
        }
    }
    Ok(out)
}

pub async fn list(ctx: &RequestContext, token: &IdentityToken, controller: &str) -> AppResult<Vec<ModelView>> {
    let auth = authorize(ctx, token, controller, None).await?;
    visible_models(ctx, token, &auth.controller).await
}

pub async fn info(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str) -> AppResult<ModelInfo> {
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?;
    require_model(msession, ModelAccess::Read, "viewing a model")?;
    let status = status::fetch(ctx, msession).await?;
    let users = ctx.store().list_model_users(auth.controller.name(), msession.name()).await?;
    Ok(ModelInfo {
        name: msession.name().to_string(),
        uuid: msession.uuid().to_string(),
        controller: auth.controller.name().to_string(),
        access: msession.access(),
        status,
        users,
    })
}

/// Create `model` owned by the caller and record the caller as its admin.
pub async fn create(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, ssh_key: Option<&str>) -> AppResult<ModelView> {
    let model = crate::ident::check_name("model", model)?;
    let ssh_key = ssh_key.map(str::trim).filter(|k| !k.is_empty());
    if let Some(key) = ssh_key { super::ssh_keys::validate_key(key)?; }
    let auth = authorize(ctx, token, controller, None).await?;
    let csession = &auth.controller;
    require_controller(csession, ControllerAccess::AddModel, "creating a model")?;
    if ctx.connections().list_models(csession).await?.iter().any(|m| m.name == model) {
        return Err(AppError::conflict("model"));
    }
    let owner = token.account().to_string();
    let primary = SessionCall::new(
        "create model",
        RpcRequest::new("ModelManager", 5, "CreateModel", json!({"name": model, "owner-tag": user_tag(&owner), "config": {}})),
        |v| Ok(v.get("uuid").and_then(Value::as_str).map(String::from)),
    );
    let fallback = ProcessCall::text(&["add-model", model], |_| Ok(None)).controller_scoped();
    let uuid = ctx.invoker().invoke(csession, primary, fallback).await?;
    info!(target: "sojobo::ops", "model {}:{} created by {}", controller, model, owner);
    ctx.store().set_model_access(csession.name(), model, &owner, ModelAccess::Admin).await?;

    let summary = ctx.connections().find_model(csession, model).await?;
    let uuid = uuid.unwrap_or_else(|| summary.uuid.clone());
    if let Some(key) = ssh_key {
        let msession = ctx.connections().open_model(token, csession, &summary, ModelAccess::Admin).await?;
        super::ssh_keys::add_to_session(ctx, token, &msession, key).await?;
    }
    Ok(ModelView { name: model.to_string(), uuid, owner, access: ModelAccess::Admin })
}

/// Destroy `model`; requires model admin. Every grant on it is dropped afterwards.
pub async fn delete(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str) -> AppResult<()> {
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?;
    require_model(msession, ModelAccess::Admin, "destroying a model")?;
    let label = msession.target().label();
    let primary = SessionCall::new(
        "destroy model",
        RpcRequest::new("ModelManager", 5, "DestroyModels", json!({"models": [{"model-tag": format!("model-{}", msession.uuid())}]})),
        |v| check_bulk(&v),
    );
    let fallback = ProcessCall::text(&["destroy-model", "-y", label.as_str()], |_| Ok(())).explicit_target();
    ctx.invoker().invoke(&auth.controller, primary, fallback).await?;
    ctx.store().forget_model(auth.controller.name(), msession.name()).await?;
    info!(target: "sojobo::ops", "model {} destroyed by {}", label, token.account());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_listing_uses_short_names() {
        let v = json!({"models": [
            {"name": "admin/dev", "short-name": "dev", "model-uuid": "u1", "owner": "admin"},
            {"name": "bob/web", "model-uuid": "u2", "owner": "bob"},
            {"name": "broken"}
        ]});
        let got = summaries_from_cli(&v);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].name, "dev");
        assert_eq!(got[1].name, "web");
        assert_eq!(got[1].owner, "bob");
    }

    #[test]
    fn api_listing() {
        let v = json!({"user-models": [{"model": {"name": "dev", "uuid": "u1", "owner-tag": "user-alice"}}]});
        assert_eq!(summaries_from_api(&v), vec![ModelSummary { name: "dev".into(), uuid: "u1".into(), owner: "alice".into() }]);
    }
}
