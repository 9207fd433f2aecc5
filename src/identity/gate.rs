//! Authentication gate: api key check, identity construction and, for accounts other
//! than the administrator, a liveness probe against one registered controller.

use argon2::{Argon2, PasswordVerifier};
use password_hash::PasswordHash;
use tracing::{debug, info};

use super::{ControllerAccess, Credentials, IdentityToken};
use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};
use crate::registry::ControllerRegistry;
use crate::session::ConnectionManager;

pub struct AuthenticationGate<'a> {
    config: &'a GatewayConfig,
    registry: &'a ControllerRegistry,
    connections: &'a ConnectionManager,
}

impl<'a> AuthenticationGate<'a> {
    pub fn new(config: &'a GatewayConfig, registry: &'a ControllerRegistry, connections: &'a ConnectionManager) -> Self {
        Self { config, registry, connections }
    }

    pub async fn authenticate(&self, api_key: &str, creds: &Credentials) -> AppResult<IdentityToken> {
        if !api_key_matches(&self.config.api_key, api_key) {
            info!(target: "sojobo::gate", "rejected request with invalid api key");
            return Err(AppError::unauthorized("invalid api key"));
        }
        if creds.username.trim().is_empty() || creds.password.is_empty() {
            return Err(AppError::unauthorized("missing account credentials"));
        }
        let token = IdentityToken::new(creds, &self.config.admin_user, &self.config.admin_password);
        if token.is_admin() {
            debug!(target: "sojobo::gate", "administrator authenticated");
            return Ok(token);
        }
        let probe = self
            .registry
            .first()
            .ok_or_else(|| AppError::unauthorized("no controller is available to verify the account"))?;
        let outcome = self.connections.open_controller(&token, &probe.name, ControllerAccess::None).await;
        match outcome {
            Ok(session) => {
                self.connections.close(&session).await;
                debug!(target: "sojobo::gate", "account {} verified against {}", token.account(), probe.name);
                Ok(token)
            }
            Err(AppError::Unauthorized { .. }) => {
                info!(target: "sojobo::gate", "account {} failed authentication on {}", token.account(), probe.name);
                Err(AppError::unauthorized("invalid account credentials"))
            }
            Err(e) => Err(e),
        }
    }
}

/// Compare the presented key with the configured one, which is either plain text or
/// an Argon2 PHC string.
pub fn api_key_matches(configured: &str, presented: &str) -> bool {
    if configured.starts_with("$argon2") {
        return match PasswordHash::new(configured) {
            Ok(parsed) => Argon2::default().verify_password(presented.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        };
    }
    let (a, b) = (configured.as_bytes(), presented.as_bytes());
    if a.len() != b.len() { return false; }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
