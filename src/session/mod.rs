//! Live controller and model sessions.
//! A session pairs a resolved access level with a `LiveConnection` slot. Sessions are
//! cheap handles (the slot sits behind an `Arc`); the `ConnectionManager` that opened
//! them keeps a ledger of every slot and closes them all when the request ends.

use std::fmt;
use std::sync::Arc;

use crate::cluster::{ClusterKind, ClusterType};
use crate::identity::{ControllerAccess, ModelAccess};

mod manager;
mod slot;

pub use manager::{ConnectionManager, ModelSummary};
pub use slot::{LiveConnection, SessionState};

/// Where a session points. Model sessions carry their controller's coordinates so the
/// CLI fallback and reconnects can target the same place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub controller: String,
    pub kind: ClusterKind,
    pub endpoint: String,
    pub model: Option<String>,
    pub model_uuid: Option<String>,
}

impl ConnectTarget {
    /// `controller` or `controller:model`, the form the CLI accepts for `-m`.
    pub fn label(&self) -> String {
        match &self.model {
            Some(m) => format!("{}:{}", self.controller, m),
            None => self.controller.clone(),
        }
    }

    pub fn cluster(&self) -> &'static dyn ClusterType { self.kind.handler() }
}

/// Common view the invoker needs of either session kind.
pub trait Session: Send + Sync {
    fn target(&self) -> &ConnectTarget;
    fn live(&self) -> &Arc<LiveConnection>;
}

#[derive(Clone)]
pub struct ControllerSession {
    target: ConnectTarget,
    access: ControllerAccess,
    live: Arc<LiveConnection>,
}

impl ControllerSession {
    pub(crate) fn new(target: ConnectTarget, access: ControllerAccess, live: Arc<LiveConnection>) -> Self {
        Self { target, access, live }
    }

    pub fn name(&self) -> &str { &self.target.controller }
    pub fn kind(&self) -> ClusterKind { self.target.kind }
    pub fn endpoint(&self) -> &str { &self.target.endpoint }
    /// Level resolved for the caller when the session was opened.
    pub fn access(&self) -> ControllerAccess { self.access }
    pub async fn state(&self) -> SessionState { self.live.state().await }
}

impl Session for ControllerSession {
    fn target(&self) -> &ConnectTarget { &self.target }
    fn live(&self) -> &Arc<LiveConnection> { &self.live }
}

impl fmt::Debug for ControllerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerSession")
            .field("controller", &self.target.controller)
            .field("kind", &self.target.kind)
            .field("access", &self.access)
            .finish()
    }
}

#[derive(Clone)]
pub struct ModelSession {
    target: ConnectTarget,
    uuid: String,
    access: ModelAccess,
    live: Arc<LiveConnection>,
}

impl ModelSession {
    pub(crate) fn new(target: ConnectTarget, uuid: String, access: ModelAccess, live: Arc<LiveConnection>) -> Self {
        Self { target, uuid, access, live }
    }

    pub fn name(&self) -> &str { self.target.model.as_deref().unwrap_or_default() }
    pub fn uuid(&self) -> &str { &self.uuid }
    pub fn controller(&self) -> &str { &self.target.controller }
    pub fn access(&self) -> ModelAccess { self.access }
    pub async fn state(&self) -> SessionState { self.live.state().await }
}

impl Session for ModelSession {
    fn target(&self) -> &ConnectTarget { &self.target }
    fn live(&self) -> &Arc<LiveConnection> { &self.live }
}

impl fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSession")
            .field("model", &self.target.label())
            .field("uuid", &self.uuid)
            .field("access", &self.access)
            .finish()
    }
}
