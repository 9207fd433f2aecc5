//! Machines in a model.

use serde_json::json;

use super::status::{self, MachineStatus};
use super::{authorize, check_bulk, require_model};
use crate::error::{AppError, AppResult};
use crate::ident::{check_machine, check_opt_name};
use crate::identity::{IdentityToken, ModelAccess, RequestContext};
use crate::invoker::{ProcessCall, SessionCall};
use crate::remote::RpcRequest;
use crate::session::Session;

pub async fn list(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str) -> AppResult<Vec<MachineStatus>> {
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?;
    require_model(msession, ModelAccess::Read, "listing machines")?;
    Ok(status::fetch(ctx, msession).await?.machines.into_values().collect())
}

pub async fn get(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, machine: &str) -> AppResult<MachineStatus> {
    let machine = check_machine(machine)?;
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?;
    require_model(msession, ModelAccess::Read, "viewing a machine")?;
    let st = status::fetch(ctx, msession).await?;
    st.machine(machine).cloned().ok_or_else(|| AppError::not_found("machine"))
}

/// Provision one machine. The series must be one the controller's cloud offers.
pub async fn add(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, series: Option<&str>) -> AppResult<Vec<MachineStatus>> {
    let series = check_opt_name("series", series)?;
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?;
    require_model(msession, ModelAccess::Write, "adding a machine")?;
    if let Some(s) = series {
        if !msession.target().cluster().supports_series(s) {
            return Err(AppError::invalid(format!("the cloud does not support series {}", s)));
        }
    }
    let mut params = json!({"jobs": ["JobHostUnits"]});
    if let Some(s) = series { params["series"] = json!(s); }
    let primary = SessionCall::new(
        "add machine",
        RpcRequest::new("MachineManager", 4, "AddMachines", json!({"params": [params]})),
        |v| check_bulk(&v),
    );
    let mut args = vec!["add-machine"];
    if let Some(s) = series { args.extend(["--series", s]); }
    let fallback = ProcessCall::text(&args, |_| Ok(()));
    ctx.invoker().invoke(msession, primary, fallback).await?;
    Ok(status::fetch(ctx, msession).await?.machines.into_values().collect())
}

pub async fn remove(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, machine: &str) -> AppResult<()> {
    let machine = check_machine(machine)?;
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?;
    require_model(msession, ModelAccess::Write, "removing a machine")?;
    if status::fetch(ctx, msession).await?.machine(machine).is_none() {
        return Err(AppError::not_found("machine"));
    }
    let tag = format!("machine-{}", machine.replace('/', "-"));
    let primary = SessionCall::new(
        "remove machine",
        RpcRequest::new("MachineManager", 4, "DestroyMachineWithParams", json!({"machine-tags": [tag], "force": false})),
        |v| check_bulk(&v),
    );
    let fallback = ProcessCall::text(&["remove-machine", machine], |_| Ok(()));
    ctx.invoker().invoke(msession, primary, fallback).await
}
