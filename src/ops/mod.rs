//! Business operations.
//! Each operation validates its inputs, authorizes through the resolver, checks the
//! resolved level, and issues remote work through the capability invoker. Sessions
//! opened here are closed by the task bridge when the request ends.

use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::identity::{Authorized, ControllerAccess, IdentityToken, ModelAccess, RequestContext};
use crate::remote::{entity_error, Phase};
use crate::session::{ControllerSession, ModelSession};

pub mod applications;
pub mod controllers;
pub mod machines;
pub mod models;
pub mod ssh_keys;
pub mod status;
pub mod users;

/// Validate names, then authorize `token` on `controller[:model]`.
pub async fn authorize(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: Option<&str>) -> AppResult<Authorized> {
    let controller = crate::ident::check_name("controller", controller)?;
    let model = crate::ident::check_opt_name("model", model)?;
    ctx.resolver().authorize(token, controller, model).await
}

pub fn require_controller(session: &ControllerSession, min: ControllerAccess, action: &str) -> AppResult<()> {
    if session.access() >= min && session.access().is_valid() { Ok(()) } else {
        Err(AppError::forbidden(format!("{} requires {} access on controller {}", action, min, session.name())))
    }
}

pub fn require_model(session: &ModelSession, min: ModelAccess, action: &str) -> AppResult<()> {
    if session.access() >= min && session.access().is_valid() { Ok(()) } else {
        Err(AppError::forbidden(format!("{} requires {} access on model {}", action, min, session.name())))
    }
}

/// Fail on the first per-entity error in a bulk reply.
pub(crate) fn check_bulk(reply: &Value) -> AppResult<()> {
    for entry in reply.get("results").and_then(Value::as_array).into_iter().flatten() {
        if let Some(e) = entity_error(entry) { return Err(e.classify(Phase::Call)); }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bulk_errors_surface() {
        assert!(check_bulk(&json!({"results": [{}, {"error": null}]})).is_ok());
        let e = check_bulk(&json!({"results": [{"error": {"code": "", "message": "cannot add unit"}}]})).unwrap_err();
        assert_eq!(e, AppError::remote("cannot add unit"));
        assert!(check_bulk(&json!({})).is_ok());
    }
}
