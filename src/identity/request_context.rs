//! Per-request context: request id, the request's connection manager and views over
//! the shared gateway services.

use std::sync::Arc;

use super::{AuthenticationGate, AuthorizationResolver};
use crate::bridge::GatewayServices;
use crate::charmstore::CharmStore;
use crate::config::GatewayConfig;
use crate::invoker::CapabilityInvoker;
use crate::permissions::PermissionStore;
use crate::registry::ControllerRegistry;
use crate::session::ConnectionManager;

pub struct RequestContext {
    request_id: String,
    services: Arc<GatewayServices>,
    connections: Arc<ConnectionManager>,
}

impl RequestContext {
    pub fn new(services: Arc<GatewayServices>) -> Self {
        let connections = Arc::new(services.connection_manager());
        Self { request_id: uuid::Uuid::new_v4().to_string(), services, connections }
    }

    pub fn request_id(&self) -> &str { &self.request_id }
    pub fn services(&self) -> &Arc<GatewayServices> { &self.services }
    pub fn config(&self) -> &GatewayConfig { &self.services.config }
    pub fn registry(&self) -> &ControllerRegistry { &self.services.registry }
    pub fn store(&self) -> &dyn PermissionStore { self.services.store.as_ref() }
    pub fn charms(&self) -> &CharmStore { &self.services.charms }
    pub fn connections(&self) -> &Arc<ConnectionManager> { &self.connections }

    pub fn gate(&self) -> AuthenticationGate<'_> {
        AuthenticationGate::new(&self.services.config, &self.services.registry, &self.connections)
    }

    pub fn resolver(&self) -> AuthorizationResolver<'_> {
        AuthorizationResolver::new(&self.services.registry, self.services.store.as_ref(), &self.connections)
    }

    pub fn invoker(&self) -> CapabilityInvoker<'_> {
        CapabilityInvoker::new(&self.connections, self.services.runner.as_ref())
    }
}
