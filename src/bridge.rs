//! Task bridge: runs one request's work to completion on its own task.
//! Steps inside one request run strictly in order; different requests run in
//! parallel. The work is spawned, so a dropped client connection does not cancel
//! remote calls already in flight, and every session the request opened is closed
//! before the result is handed back.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error};

use crate::charmstore::CharmStore;
use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{IdentityToken, RequestContext};
use crate::invoker::CommandRunner;
use crate::permissions::PermissionStore;
use crate::registry::ControllerRegistry;
use crate::remote::ClusterTransport;
use crate::session::ConnectionManager;

/// Process-wide collaborators, built once at startup and shared read-only.
pub struct GatewayServices {
    pub config: GatewayConfig,
    pub registry: Arc<ControllerRegistry>,
    pub store: Arc<dyn PermissionStore>,
    pub transport: Arc<dyn ClusterTransport>,
    pub runner: Arc<dyn CommandRunner>,
    pub charms: CharmStore,
}

impl GatewayServices {
    /// Fresh connection manager for one request.
    pub fn connection_manager(&self) -> ConnectionManager {
        ConnectionManager::new(
            self.registry.clone(),
            self.transport.clone(),
            IdentityToken::administrator(&self.config.admin_user, &self.config.admin_password),
            self.config.connect_timeout(),
            self.config.call_timeout(),
        )
    }
}

#[derive(Clone)]
pub struct TaskBridge {
    services: Arc<GatewayServices>,
}

impl TaskBridge {
    pub fn new(services: Arc<GatewayServices>) -> Self { Self { services } }

    pub fn services(&self) -> &Arc<GatewayServices> { &self.services }

    pub async fn run_request<F, Fut, T>(&self, work: F) -> AppResult<T>
    where
        F: FnOnce(Arc<RequestContext>) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let ctx = Arc::new(RequestContext::new(self.services.clone()));
        let connections = ctx.connections().clone();
        let request_id = ctx.request_id().to_string();
        let handle = tokio::spawn(async move {
            let out = work(ctx.clone()).await;
            let closed = ctx.connections().close_all().await;
            debug!(target: "sojobo::bridge", "request {} finished ok={} closed={}", ctx.request_id(), out.is_ok(), closed);
            out
        });
        match handle.await {
            Ok(out) => out,
            Err(join_err) => {
                error!(target: "sojobo::bridge", "request {} aborted: {}", request_id, join_err);
                connections.close_all().await;
                Err(AppError::internal("request task failed"))
            }
        }
    }
}
