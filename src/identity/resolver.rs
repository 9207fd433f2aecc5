//! Authorization resolver.
//! Two tiers: the permission cache decides whether the caller can see a controller or
//! model at all (no grant reads as "does not exist"); the level resolved live when the
//! session opens is the one later checks use. The controller tier is always evaluated
//! and must pass before anything about the model is looked at.

use tracing::debug;

use super::{ControllerAccess, IdentityToken, ModelAccess};
use crate::error::{AppError, AppResult};
use crate::permissions::PermissionStore;
use crate::registry::ControllerRegistry;
use crate::session::{ConnectionManager, ControllerSession, ModelSession};

/// Sessions opened for an authorized request. Closing them is the request's job.
#[derive(Debug)]
pub struct Authorized {
    pub controller: ControllerSession,
    pub model: Option<ModelSession>,
}

impl Authorized {
    /// The model session; only absent when no model was requested.
    pub fn model(&self) -> AppResult<&ModelSession> {
        self.model.as_ref().ok_or_else(|| AppError::invalid("no model selected"))
    }
}

pub struct AuthorizationResolver<'a> {
    registry: &'a ControllerRegistry,
    store: &'a dyn PermissionStore,
    connections: &'a ConnectionManager,
}

impl<'a> AuthorizationResolver<'a> {
    pub fn new(registry: &'a ControllerRegistry, store: &'a dyn PermissionStore, connections: &'a ConnectionManager) -> Self {
        Self { registry, store, connections }
    }

    /// Cached controller level. The administrator sees every registered controller.
    pub async fn cached_controller_access(&self, token: &IdentityToken, controller: &str) -> AppResult<ControllerAccess> {
        let level = self.store.get_controller_access(controller, token.account()).await?;
        Ok(if token.is_admin() && !level.is_valid() { ControllerAccess::Superuser } else { level })
    }

    /// Cached model level. The administrator sees every listed model.
    pub async fn cached_model_access(&self, token: &IdentityToken, controller: &str, model: &str) -> AppResult<ModelAccess> {
        let level = self.store.get_model_access(controller, model, token.account()).await?;
        Ok(if token.is_admin() && !level.is_valid() { ModelAccess::Admin } else { level })
    }

    pub async fn authorize(&self, token: &IdentityToken, controller: &str, model: Option<&str>) -> AppResult<Authorized> {
        if !self.registry.contains(controller) {
            return Err(AppError::not_found("controller"));
        }
        let cached = self.cached_controller_access(token, controller).await?;
        if !cached.is_valid() {
            debug!(target: "sojobo::authz", "{} has no grant on {}", token.account(), controller);
            return Err(AppError::not_found("controller"));
        }
        let csession = self.connections.open_controller(token, controller, cached).await?;
        let Some(model) = model else {
            return Ok(Authorized { controller: csession, model: None });
        };
        let summary = self.connections.find_model(&csession, model).await?;
        let mcached = self.cached_model_access(token, controller, model).await?;
        if !mcached.is_valid() {
            debug!(target: "sojobo::authz", "{} has no grant on {}:{}", token.account(), controller, model);
            return Err(AppError::not_found("model"));
        }
        let msession = self.connections.open_model(token, &csession, &summary, mcached).await?;
        debug!(target: "sojobo::authz", "{} authorized on {}:{} ({}/{})",
            token.account(), controller, model, csession.access(), msession.access());
        Ok(Authorized { controller: csession, model: Some(msession) })
    }
}
