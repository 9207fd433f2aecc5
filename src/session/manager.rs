//! Per-request connection manager.
//! Opens controller and model sessions for one identity, resolves the caller's live
//! access level right after connecting, and records every slot it creates so the
//! request can close them all on the way out.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{ConnectTarget, ControllerSession, LiveConnection, ModelSession, Session};
use crate::cluster::user_tag;
use crate::error::{AppError, AppResult};
use crate::identity::{ControllerAccess, IdentityToken, ModelAccess};
use crate::registry::ControllerRegistry;
use crate::remote::{first_result, ClusterTransport, Phase, RemoteError, RpcRequest};

/// One entry of the controller's live model listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub uuid: String,
    pub owner: String,
}

impl ModelSummary {
    /// One `user-models` entry of a `ListModels` reply.
    pub fn from_listing(entry: &Value) -> Option<Self> {
        let m = entry.get("model").unwrap_or(entry);
        Some(Self {
            name: m.get("name")?.as_str()?.to_string(),
            uuid: m.get("uuid")?.as_str()?.to_string(),
            owner: m
                .get("owner-tag")
                .and_then(Value::as_str)
                .map(|t| t.trim_start_matches("user-").to_string())
                .unwrap_or_default(),
        })
    }
}

pub struct ConnectionManager {
    registry: Arc<ControllerRegistry>,
    transport: Arc<dyn ClusterTransport>,
    admin: IdentityToken,
    connect_timeout: Duration,
    call_timeout: Duration,
    ledger: Mutex<Vec<Arc<LiveConnection>>>,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<ControllerRegistry>,
        transport: Arc<dyn ClusterTransport>,
        admin: IdentityToken,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self { registry, transport, admin, connect_timeout, call_timeout, ledger: Mutex::new(Vec::new()) }
    }

    pub fn registry(&self) -> &ControllerRegistry { &self.registry }
    pub fn call_timeout(&self) -> Duration { self.call_timeout }
    /// Identity used to refresh rejected credentials.
    pub fn administrator(&self) -> &IdentityToken { &self.admin }

    fn new_slot(&self, label: String) -> Arc<LiveConnection> {
        let live = Arc::new(LiveConnection::new(label));
        self.ledger.lock().push(live.clone());
        live
    }

    /// Connect to `controller` as `token` and resolve the caller's controller level.
    /// `cached` is used when the controller cannot report the level itself.
    pub async fn open_controller(&self, token: &IdentityToken, controller: &str, cached: ControllerAccess) -> AppResult<ControllerSession> {
        let rec = self.registry.get(controller).ok_or_else(|| AppError::not_found("controller"))?;
        let target = ConnectTarget {
            controller: rec.name.clone(),
            kind: rec.kind,
            endpoint: rec.endpoint.clone(),
            model: None,
            model_uuid: None,
        };
        let live = self.new_slot(target.label());
        let cred = rec.cluster().credential(&rec.endpoint, token.account(), token.secret());
        debug!(target: "sojobo::session", "opening controller session {} as {}", controller, token.account());
        live.establish(self.transport.as_ref(), cred, None, self.connect_timeout)
            .await
            .map_err(|e| e.classify(Phase::Connect))?;
        match self.controller_access(&live, token.account(), cached).await {
            Ok(access) => Ok(ControllerSession::new(target, access, live)),
            Err(e) => {
                live.close().await;
                Err(e)
            }
        }
    }

    async fn controller_access(&self, live: &LiveConnection, account: &str, cached: ControllerAccess) -> AppResult<ControllerAccess> {
        let req = RpcRequest::new("UserManager", 1, "UserInfo", json!({"entities": [{"tag": user_tag(account)}], "include-disabled": false}));
        match live.call(&req, self.call_timeout).await.and_then(|v| first_result(&v)) {
            Ok(info) => Ok(ControllerAccess::parse(info.get("access").and_then(Value::as_str).unwrap_or_default())),
            Err(RemoteError::Unsupported(_)) | Err(RemoteError::AuthFault(_)) => {
                debug!(target: "sojobo::session", "{}: live controller access unavailable, using cached {}", live.label(), cached);
                Ok(cached)
            }
            Err(e) => Err(e.classify(Phase::Call)),
        }
    }

    /// Live model listing visible to the identity the controller session holds.
    pub async fn list_models(&self, controller: &ControllerSession) -> AppResult<Vec<ModelSummary>> {
        let account = controller
            .live()
            .credential()
            .await
            .map(|c| c.account)
            .ok_or_else(|| AppError::connection(format!("session {} is not open", controller.name())))?;
        let req = RpcRequest::new("ModelManager", 5, "ListModels", json!({"tag": user_tag(&account)}));
        let reply = controller.live().call(&req, self.call_timeout).await.map_err(|e| match e {
            RemoteError::Unsupported(m) => AppError::remote(format!("model listing unavailable: {}", m)),
            other => other.classify(Phase::Call),
        })?;
        Ok(reply
            .get("user-models")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(ModelSummary::from_listing).collect())
            .unwrap_or_default())
    }

    /// Scan the live listing for `name`.
    pub async fn find_model(&self, controller: &ControllerSession, name: &str) -> AppResult<ModelSummary> {
        self.list_models(controller)
            .await?
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| AppError::not_found("model"))
    }

    /// Connect to `model` on the controller session's endpoint and resolve the model level.
    pub async fn open_model(
        &self,
        token: &IdentityToken,
        controller: &ControllerSession,
        model: &ModelSummary,
        cached: ModelAccess,
    ) -> AppResult<ModelSession> {
        let mut target = controller.target().clone();
        target.model = Some(model.name.clone());
        target.model_uuid = Some(model.uuid.clone());
        let live = self.new_slot(target.label());
        let cred = target.cluster().credential(&target.endpoint, token.account(), token.secret());
        debug!(target: "sojobo::session", "opening model session {} ({})", target.label(), model.uuid);
        live.establish(self.transport.as_ref(), cred, Some(&model.uuid), self.connect_timeout)
            .await
            .map_err(|e| e.classify(Phase::Connect))?;
        // controller superusers administer every model
        let access = if controller.access() == ControllerAccess::Superuser {
            Ok(ModelAccess::Admin)
        } else {
            self.model_access(controller, &model.uuid, token.account(), cached).await
        };
        match access {
            Ok(access) => Ok(ModelSession::new(target, model.uuid.clone(), access, live)),
            Err(e) => {
                live.close().await;
                Err(e)
            }
        }
    }

    async fn model_access(&self, controller: &ControllerSession, uuid: &str, account: &str, cached: ModelAccess) -> AppResult<ModelAccess> {
        let req = RpcRequest::new("ModelManager", 5, "ModelInfo", json!({"entities": [{"tag": format!("model-{}", uuid)}]}));
        match controller.live().call(&req, self.call_timeout).await.and_then(|v| first_result(&v)) {
            Ok(info) => {
                let users = info.get("users").and_then(Value::as_array).cloned().unwrap_or_default();
                let level = users
                    .iter()
                    .find(|u| u.get("user").and_then(Value::as_str).map(|n| n.trim_end_matches("@local")) == Some(account))
                    .and_then(|u| u.get("access").and_then(Value::as_str))
                    .map(ModelAccess::parse)
                    .unwrap_or_default();
                Ok(level)
            }
            Err(RemoteError::Unsupported(_)) | Err(RemoteError::AuthFault(_)) => {
                debug!(target: "sojobo::session", "model {}: live access unavailable, using cached {}", uuid, cached);
                Ok(cached)
            }
            Err(e) => Err(e.classify(Phase::Call)),
        }
    }

    /// Re-establish `session` as `token`. The held connection is closed first.
    pub async fn reopen<S: Session + ?Sized>(&self, session: &S, token: &IdentityToken) -> AppResult<()> {
        let t = session.target();
        let cred = t.cluster().credential(&t.endpoint, token.account(), token.secret());
        session
            .live()
            .establish(self.transport.as_ref(), cred, t.model_uuid.as_deref(), self.connect_timeout)
            .await
            .map_err(|e| e.classify(Phase::Connect))
    }

    /// Refresh a rejected credential by reconnecting as the administrator.
    pub async fn reauthenticate<S: Session + ?Sized>(&self, session: &S) -> AppResult<()> {
        info!(target: "sojobo::session", "{}: credential rejected, reconnecting as administrator", session.target().label());
        self.reopen(session, &self.admin).await
    }

    /// Idempotent close.
    pub async fn close<S: Session + ?Sized>(&self, session: &S) -> bool { session.live().close().await }

    /// Close every slot this manager opened. Returns how many live connections were released.
    pub async fn close_all(&self) -> usize {
        let slots: Vec<Arc<LiveConnection>> = std::mem::take(&mut *self.ledger.lock());
        let mut released = 0;
        for live in slots {
            if live.close().await { released += 1; }
        }
        if released > 0 {
            debug!(target: "sojobo::session", "closed {} session(s) at end of request", released);
        }
        released
    }

    /// Number of slots created and not yet swept by `close_all`.
    pub fn tracked(&self) -> usize { self.ledger.lock().len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_entries_parse() {
        let e = json!({"model": {"name": "dev", "uuid": "u-1", "owner-tag": "user-alice"}, "last-connection": null});
        let m = ModelSummary::from_listing(&e).unwrap();
        assert_eq!(m, ModelSummary { name: "dev".into(), uuid: "u-1".into(), owner: "alice".into() });
        assert!(ModelSummary::from_listing(&json!({"model": {"name": "x"}})).is_none());
    }
}
