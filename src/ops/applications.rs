//! Applications, their units, and the relations between them.

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::status::{self, ApplicationStatus, ModelStatus, RelationStatus, UnitStatus};
use super::{authorize, check_bulk, require_model};
use crate::error::{AppError, AppResult};
use crate::ident::{check_name, check_opt_name, check_placement, unit_name, wants_lxd};
use crate::identity::{IdentityToken, ModelAccess, RequestContext};
use crate::invoker::{ProcessCall, SessionCall};
use crate::remote::RpcRequest;
use crate::session::{ModelSession, Session};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeployRequest {
    pub application: String,
    #[serde(default)]
    pub series: Option<String>,
    /// Placement: machine id, `lxd` or `lxd:<machine>`.
    #[serde(default)]
    pub target: Option<String>,
}

async fn status_for(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, min: ModelAccess, action: &str)
    -> AppResult<(ModelSession, ModelStatus)>
{
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?.clone();
    require_model(&msession, min, action)?;
    let st = status::fetch(ctx, &msession).await?;
    Ok((msession, st))
}

/// `cs:xenial/mysql` and `local:mysql` both deploy an application named `mysql`.
fn application_name(charm: &str) -> &str {
    let bare = charm.split_once(':').map(|(_, rest)| rest).unwrap_or(charm);
    bare.rsplit('/').next().unwrap_or(bare)
}

/// Command line source for `charm`; local charms resolve under the configured charm directory.
fn charm_source(ctx: &RequestContext, charm: &str) -> AppResult<String> {
    let Some(name) = charm.strip_prefix("local:") else { return Ok(charm.to_string()) };
    let dir = ctx
        .config()
        .local_charm_dir
        .as_ref()
        .ok_or_else(|| AppError::invalid("local charms are not enabled on this gateway"))?;
    let path = dir.join(application_name(name));
    if !path.is_dir() {
        return Err(AppError::not_found("charm"));
    }
    Ok(path.display().to_string())
}

fn placement(target: Option<&str>) -> Option<serde_json::Value> {
    target.map(|t| match t.strip_prefix("lxd:") {
        Some(machine) => json!({"scope": "lxd", "directive": machine}),
        None if t == "lxd" => json!({"scope": "lxd", "directive": ""}),
        None => json!({"scope": "#", "directive": t}),
    })
}

/// Cloud, placement and charm series checks for a new application or machine.
async fn check_series(ctx: &RequestContext, msession: &ModelSession, st: &ModelStatus, charm: Option<&str>, series: Option<&str>, target: Option<&str>) -> AppResult<()> {
    let cluster = msession.target().cluster();
    if let Some(t) = target {
        if wants_lxd(t) && !cluster.supports_lxd() {
            return Err(AppError::invalid(format!("{} clouds do not support lxd placement", cluster.kind())));
        }
        let machine = t.strip_prefix("lxd:").unwrap_or(t);
        if t != "lxd" && st.machine(machine).is_none() {
            return Err(AppError::not_found("machine"));
        }
    }
    let Some(series) = series else { return Ok(()) };
    if !cluster.supports_series(series) {
        return Err(AppError::invalid(format!("the cloud does not support series {}", series)));
    }
    if let Some(charm) = charm {
        if let Some(supported) = ctx.charms().supported_series(charm).await? {
            if !supported.iter().any(|s| s == series) {
                return Err(AppError::invalid(format!("the application does not support series {}", series)));
            }
        }
    }
    if let Some(t) = target.filter(|t| !t.starts_with("lxd")) {
        if let Some(m) = st.machine(t) {
            if m.series.as_deref().is_some_and(|ms| ms != series) {
                return Err(AppError::invalid("target machine and application series mismatch"));
            }
        }
    }
    Ok(())
}

pub async fn list(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str) -> AppResult<Vec<ApplicationStatus>> {
    let (_, st) = status_for(ctx, token, controller, model, ModelAccess::Read, "listing applications").await?;
    Ok(st.applications.into_values().collect())
}

pub async fn get(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, application: &str) -> AppResult<ApplicationStatus> {
    let application = check_name("application", application)?;
    let (_, st) = status_for(ctx, token, controller, model, ModelAccess::Read, "viewing an application").await?;
    st.applications.get(application).cloned().ok_or_else(|| AppError::not_found("application"))
}

pub async fn deploy(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, req: &DeployRequest) -> AppResult<ApplicationStatus> {
    let charm = req.application.trim();
    let app = check_name("application", application_name(charm))?.to_string();
    let series = check_opt_name("series", req.series.as_deref())?;
    let target = match req.target.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => Some(check_placement(t)?),
        None => None,
    };
    let (msession, st) = status_for(ctx, token, controller, model, ModelAccess::Write, "deploying an application").await?;
    if st.application(&app).is_some() {
        return Err(AppError::conflict("application"));
    }
    check_series(ctx, &msession, &st, Some(charm), series, target).await?;
    let source = charm_source(ctx, charm)?;

    let mut spec = json!({"application": app, "charm-url": charm, "num-units": 1});
    if let Some(s) = series { spec["series"] = json!(s); }
    if let Some(p) = placement(target) { spec["placement"] = json!([p]); }
    let primary = SessionCall::new("deploy", RpcRequest::new("Application", 5, "Deploy", json!({"applications": [spec]})), |v| check_bulk(&v));
    let mut args: Vec<&str> = vec!["deploy", source.as_str()];
    if let Some(s) = series { args.extend(["--series", s]); }
    if let Some(t) = target { args.extend(["--to", t]); }
    let fallback = ProcessCall::text(&args, |_| Ok(()));
    ctx.invoker().invoke(&msession, primary, fallback).await?;
    info!(target: "sojobo::ops", "{} deployed {} on {}", token.account(), app, msession.target().label());

    let st = status::fetch(ctx, &msession).await?;
    Ok(st.applications.get(&app).cloned().unwrap_or_else(|| ApplicationStatus { name: app.clone(), charm: charm.to_string(), ..Default::default() }))
}

pub async fn remove(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, application: &str) -> AppResult<()> {
    let application = check_name("application", application)?;
    let (msession, st) = status_for(ctx, token, controller, model, ModelAccess::Write, "removing an application").await?;
    if st.application(application).is_none() {
        return Err(AppError::not_found("application"));
    }
    let primary = SessionCall::new(
        "remove application",
        RpcRequest::new("Application", 5, "DestroyApplication", json!({"applications": [{"application-tag": format!("application-{}", application)}]})),
        |v| check_bulk(&v),
    );
    let fallback = ProcessCall::text(&["remove-application", application], |_| Ok(()));
    ctx.invoker().invoke(&msession, primary, fallback).await
}

pub async fn units(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, application: &str) -> AppResult<Vec<UnitStatus>> {
    get(ctx, token, controller, model, application).await.map(|a| a.units)
}

pub async fn unit(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, application: &str, number: &str) -> AppResult<UnitStatus> {
    let application = check_name("application", application)?;
    let name = unit_name(application, number)?;
    let (_, st) = status_for(ctx, token, controller, model, ModelAccess::Read, "viewing a unit").await?;
    if st.application(application).is_none() {
        return Err(AppError::not_found("application"));
    }
    st.unit(&name).cloned().ok_or_else(|| AppError::not_found("unit"))
}

/// Add one unit. Never retried on its own: a second attempt would add a second unit.
pub async fn add_unit(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, application: &str, target: Option<&str>) -> AppResult<Vec<UnitStatus>> {
    let application = check_name("application", application)?;
    let target = match target.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => Some(check_placement(t)?),
        None => None,
    };
    let (msession, st) = status_for(ctx, token, controller, model, ModelAccess::Write, "adding a unit").await?;
    let existing = st.application(application).ok_or_else(|| AppError::not_found("application"))?;
    check_series(ctx, &msession, &st, None, existing.series.as_deref(), target).await?;
    let mut params = json!({"application": application, "num-units": 1});
    if let Some(p) = placement(target) { params["placement"] = json!([p]); }
    let primary = SessionCall::new("add unit", RpcRequest::new("Application", 5, "AddUnits", params), |_| Ok(()));
    let mut args: Vec<&str> = vec!["add-unit", application];
    if let Some(t) = target { args.extend(["--to", t]); }
    let fallback = ProcessCall::text(&args, |_| Ok(()));
    ctx.invoker().invoke(&msession, primary, fallback).await?;
    let st = status::fetch(ctx, &msession).await?;
    Ok(st.application(application).map(|a| a.units.clone()).unwrap_or_default())
}

pub async fn remove_unit(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, application: &str, number: &str) -> AppResult<()> {
    let application = check_name("application", application)?;
    let name = unit_name(application, number)?;
    let (msession, st) = status_for(ctx, token, controller, model, ModelAccess::Write, "removing a unit").await?;
    if st.unit(&name).is_none() {
        return Err(AppError::not_found("unit"));
    }
    let primary = SessionCall::new(
        "remove unit",
        RpcRequest::new("Application", 5, "DestroyUnit", json!({"units": [{"unit-tag": format!("unit-{}", name.replace('/', "-"))}]})),
        |v| check_bulk(&v),
    );
    let fallback = ProcessCall::text(&["remove-unit", name.as_str()], |_| Ok(()));
    ctx.invoker().invoke(&msession, primary, fallback).await
}

pub async fn relations(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, application: Option<&str>) -> AppResult<Vec<RelationStatus>> {
    let application = check_opt_name("application", application)?;
    let (_, st) = status_for(ctx, token, controller, model, ModelAccess::Read, "listing relations").await?;
    match application {
        Some(app) => {
            let a = st.application(app).ok_or_else(|| AppError::not_found("application"))?;
            Ok(a.relations.clone())
        }
        None => Ok(st.relations()),
    }
}

pub async fn add_relation(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, app1: &str, app2: &str) -> AppResult<Vec<RelationStatus>> {
    let (app1, app2) = (check_name("application", app1)?, check_name("application", app2)?);
    let (msession, st) = status_for(ctx, token, controller, model, ModelAccess::Write, "adding a relation").await?;
    for app in [app1, app2] {
        if st.application(app).is_none() { return Err(AppError::not_found("application")); }
    }
    let primary = SessionCall::new("add relation", RpcRequest::new("Application", 5, "AddRelation", json!({"endpoints": [app1, app2]})), |_| Ok(()));
    let fallback = ProcessCall::text(&["add-relation", app1, app2], |_| Ok(()));
    ctx.invoker().invoke(&msession, primary, fallback).await?;
    Ok(status::fetch(ctx, &msession).await?.relations())
}

pub async fn remove_relation(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, app1: &str, app2: &str) -> AppResult<()> {
    let (app1, app2) = (check_name("application", app1)?, check_name("application", app2)?);
    let (msession, st) = status_for(ctx, token, controller, model, ModelAccess::Write, "removing a relation").await?;
    let related = st
        .application(app1)
        .ok_or_else(|| AppError::not_found("application"))?
        .relations
        .iter()
        .any(|r| r.with.iter().any(|w| w == app2));
    if !related {
        return Err(AppError::not_found("relation"));
    }
    let primary = SessionCall::new("remove relation", RpcRequest::new("Application", 5, "DestroyRelation", json!({"endpoints": [app1, app2]})), |_| Ok(()));
    let fallback = ProcessCall::text(&["remove-relation", app1, app2], |_| Ok(()));
    ctx.invoker().invoke(&msession, primary, fallback).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_directives() {
        assert_eq!(placement(Some("lxd:2")).unwrap(), json!({"scope": "lxd", "directive": "2"}));
        assert_eq!(placement(Some("3")).unwrap(), json!({"scope": "#", "directive": "3"}));
        assert_eq!(placement(Some("lxd")).unwrap()["scope"], "lxd");
        assert!(placement(None).is_none());
    }

    #[test]
    fn application_names_from_charm_urls() {
        assert_eq!(application_name("mysql"), "mysql");
        assert_eq!(application_name("cs:xenial/mysql"), "mysql");
        assert_eq!(application_name("local:wordpress"), "wordpress");
    }

    #[test]
    fn deploy_request_defaults() {
        let r: DeployRequest = serde_json::from_value(json!({"application": "mysql"})).unwrap();
        assert!(r.series.is_none() && r.target.is_none());
    }

    #[test]
    fn local_charms_resolve_under_charm_dir() {
        use crate::permissions::JsonPermissionStore;
        use crate::testing;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("wordpress")).unwrap();
        let (transport, runner) = (testing::FakeTransport::new(), testing::FakeRunner::new());
        let mut services = testing::services(testing::registry(&[("prod", "lxd")]), Arc::new(JsonPermissionStore::in_memory()), &transport, &runner);
        assert!(matches!(charm_source(&RequestContext::new(services.clone()), "local:wordpress"), Err(AppError::InvalidRequest { .. })));

        Arc::get_mut(&mut services).unwrap().config.local_charm_dir = Some(dir.path().to_path_buf());
        let ctx = RequestContext::new(services);
        assert_eq!(charm_source(&ctx, "local:wordpress").unwrap(), dir.path().join("wordpress").display().to_string());
        assert_eq!(charm_source(&ctx, "local:ghost").unwrap_err(), AppError::not_found("charm"));
        assert_eq!(charm_source(&ctx, "cs:xenial/mysql").unwrap(), "cs:xenial/mysql");
    }
}
