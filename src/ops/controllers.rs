//! Registered controllers as the caller sees them, and their creation and removal.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::models::{visible_models, ModelView};
use super::{authorize, require_controller};
use crate::cluster::ClusterKind;
use crate::error::{AppError, AppResult};
use crate::ident::check_name;
use crate::identity::{ControllerAccess, IdentityToken, RequestContext};
use crate::invoker::{ProcessCall, SessionCall};
use crate::registry::ControllerRecord;
use crate::remote::RpcRequest;
use crate::session::ConnectTarget;

#[derive(Debug, Clone, Serialize)]
pub struct ControllerView {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ClusterKind,
    pub endpoint: String,
    pub region: Option<String>,
    pub access: ControllerAccess,
    pub models: Vec<ModelView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewController {
    pub controller: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Cloud credential already known to the client.
    #[serde(default)]
    pub credential: Option<String>,
}

async fn describe(ctx: &RequestContext, token: &IdentityToken, rec: &ControllerRecord) -> AppResult<ControllerView> {
    let auth = authorize(ctx, token, &rec.name, None).await?;
    let models = visible_models(ctx, token, &auth.controller).await;
    // one session per controller is enough; release it before moving on
    ctx.connections().close(&auth.controller).await;
    Ok(ControllerView {
        name: rec.name.clone(),
        kind: rec.kind,
        endpoint: rec.endpoint.clone(),
        region: rec.region.clone(),
        access: auth.controller.access(),
        models: models?,
    })
}

/// Every controller the caller holds a grant on, with its visible models.
pub async fn list(ctx: &RequestContext, token: &IdentityToken) -> AppResult<Vec<ControllerView>> {
    let resolver = ctx.resolver();
    let mut out = Vec::new();
    for rec in ctx.registry().records() {
        if !resolver.cached_controller_access(token, &rec.name).await?.is_valid() {
            continue;
        }
        out.push(describe(ctx, token, &rec).await?);
    }
    Ok(out)
}

pub async fn get(ctx: &RequestContext, token: &IdentityToken, controller: &str) -> AppResult<ControllerView> {
    let controller = check_name("controller", controller)?;
    let rec = ctx.registry().get(controller).ok_or_else(|| AppError::not_found("controller"))?;
    describe(ctx, token, &rec).await
}

/// `{"<name>": {"details": {"api-endpoints": ["host:port", ...]}}}` -> first endpoint.
fn api_endpoint(v: &Value, name: &str) -> AppResult<String> {
    v.get(name)
        .and_then(|c| c.pointer("/details/api-endpoints"))
        .and_then(Value::as_array)
        .and_then(|eps| eps.first())
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| AppError::remote(format!("controller {} reported no api endpoint", name)))
}

/// Bootstrap a controller and register it. Administrator only; the administrator
/// becomes its first superuser.
pub async fn create(ctx: &RequestContext, token: &IdentityToken, req: &NewController) -> AppResult<ControllerView> {
    let name = check_name("controller", &req.controller)?;
    let kind = ClusterKind::parse(&req.kind).ok_or_else(|| {
        let known: Vec<&str> = ClusterKind::ALL.iter().map(|k| k.as_str()).collect();
        AppError::invalid(format!("unknown controller type '{}', expected one of {}", req.kind, known.join(", ")))
    })?;
    let region = crate::ident::check_opt_name("region", req.region.as_deref())?;
    if !token.is_admin() {
        return Err(AppError::forbidden("only the administrator can create controllers"));
    }
    if ctx.registry().contains(name) {
        return Err(AppError::conflict("controller"));
    }
    let target = ConnectTarget { controller: name.to_string(), kind, endpoint: String::new(), model: None, model_uuid: None };
    let invoker = ctx.invoker();
    let argv = kind.handler().bootstrap_args(name, region, req.credential.as_deref());
    let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
    invoker.run_local(target.clone(), ProcessCall::text(&argv, |_| Ok(()))).await?;
    let owned = name.to_string();
    let endpoint = invoker
        .run_local(target, ProcessCall::json(&["show-controller", name], move |v| api_endpoint(&v, &owned)))
        .await?;

    let rec = ControllerRecord { name: name.to_string(), kind, endpoint, region: region.map(String::from) };
    ctx.registry().insert(rec.clone()).await?;
    ctx.store().set_controller_access(name, token.account(), ControllerAccess::Superuser).await?;
    info!(target: "sojobo::ops", "controller {} ({}) created by {} at {}", name, kind, token.account(), rec.endpoint);
    describe(ctx, token, &rec).await
}

/// Destroy a controller together with its models and forget every grant on it.
/// Requires superuser on the controller.
pub async fn delete(ctx: &RequestContext, token: &IdentityToken, controller: &str) -> AppResult<()> {
    let auth = authorize(ctx, token, controller, None).await?;
    let csession = &auth.controller;
    require_controller(csession, ControllerAccess::Superuser, "destroying a controller")?;
    let name = csession.name().to_string();
    let primary = SessionCall::new(
        "destroy controller",
        RpcRequest::new("Controller", 3, "DestroyController", json!({"destroy-models": true})),
        |_| Ok(()),
    );
    let fallback = ProcessCall::text(&["destroy-controller", name.as_str(), "-y", "--destroy-all-models"], |_| Ok(())).explicit_target();
    ctx.invoker().invoke(csession, primary, fallback).await?;
    ctx.connections().close(csession).await;
    ctx.registry().remove(&name).await?;
    ctx.store().forget_controller(&name).await?;
    info!(target: "sojobo::ops", "controller {} destroyed by {}", name, token.account());
    Ok(())
}
