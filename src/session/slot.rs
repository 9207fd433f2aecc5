//! Connection slot with an explicit lifecycle:
//! `Unopened -> Connecting -> Open -> Closed`, and `Connecting -> Closed` on a failed
//! connect. Nothing leaves `Closed`. Re-establishing an `Open` slot closes the held
//! connection first.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cluster::CredentialToken;
use crate::remote::{ClusterTransport, RemoteConnection, RemoteError, RpcRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Connecting,
    Open,
    Closed,
}

struct SlotInner {
    state: SessionState,
    conn: Option<Box<dyn RemoteConnection>>,
    credential: Option<CredentialToken>,
}

pub struct LiveConnection {
    label: String,
    inner: Mutex<SlotInner>,
}

impl LiveConnection {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), inner: Mutex::new(SlotInner { state: SessionState::Unopened, conn: None, credential: None }) }
    }

    pub fn label(&self) -> &str { &self.label }

    pub async fn state(&self) -> SessionState { self.inner.lock().await.state }

    /// Credential the current connection was opened with.
    pub async fn credential(&self) -> Option<CredentialToken> { self.inner.lock().await.credential.clone() }

    /// Connect (or reconnect) with `cred`. A held connection is closed before the new
    /// one is attempted. On failure the slot ends `Closed`.
    pub async fn establish(
        &self,
        transport: &dyn ClusterTransport,
        cred: CredentialToken,
        model_uuid: Option<&str>,
        timeout: Duration,
    ) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Closed {
            return Err(RemoteError::Transport(format!("session {} is closed", self.label)));
        }
        if let Some(mut old) = inner.conn.take() {
            debug!(target: "sojobo::session", "{}: closing previous connection before reconnect", self.label);
            old.close().await;
        }
        inner.state = SessionState::Connecting;
        inner.credential = None;
        match tokio::time::timeout(timeout, transport.connect(&cred, model_uuid)).await {
            Ok(Ok(conn)) => {
                inner.conn = Some(conn);
                inner.credential = Some(cred);
                inner.state = SessionState::Open;
                Ok(())
            }
            Ok(Err(e)) => {
                inner.state = SessionState::Closed;
                Err(e)
            }
            Err(_) => {
                inner.state = SessionState::Closed;
                Err(RemoteError::Timeout(format!("connect to {} after {:?}", cred.endpoint, timeout)))
            }
        }
    }

    pub async fn call(&self, req: &RpcRequest, timeout: Duration) -> Result<Value, RemoteError> {
        let mut inner = self.inner.lock().await;
        let state = inner.state;
        let conn = match (state, inner.conn.as_mut()) {
            (SessionState::Open, Some(c)) => c,
            (state, _) => return Err(RemoteError::Transport(format!("session {} is {:?}", self.label, state))),
        };
        crate::tprintln!("{} -> {}", self.label, req);
        match tokio::time::timeout(timeout, conn.call(req)).await {
            Ok(r) => r,
            Err(_) => Err(RemoteError::Timeout(format!("{} after {:?}", req.method(), timeout))),
        }
    }

    /// Idempotent. Returns true only when a live connection was actually released.
    pub async fn close(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let released = match inner.conn.take() {
            Some(mut conn) => {
                conn.close().await;
                true
            }
            None => false,
        };
        inner.state = SessionState::Closed;
        inner.credential = None;
        released
    }
}
