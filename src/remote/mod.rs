//! Remote cluster transport.
//! `ClusterTransport` opens a live connection to a controller (or to one model on it)
//! with a `CredentialToken`; `RemoteConnection` issues facade calls over it. Both report
//! failures as `RemoteError`, which only the session and invoker layers translate into
//! `AppError`. Timeouts are applied by the caller, not by implementations.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::cluster::CredentialToken;
use crate::error::AppError;

mod ws;

pub use ws::{classify_rpc_error, WsConnection, WsTransport};

/// Transport-level failure classes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The endpoint rejected the login or the call as not permitted for this identity.
    #[error("authentication failed: {0}")]
    AuthFault(String),
    /// The credential held by an open connection is no longer accepted.
    #[error("credential rejected: {0}")]
    StaleCredential(String),
    /// The endpoint does not implement this call.
    #[error("not supported: {0}")]
    Unsupported(String),
    /// Names the missing resource kind ("model", "application", ...).
    #[error("{0} not found")]
    NotFound(String),
    /// The call ran and reported a domain failure.
    #[error("{0}")]
    Failed(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out: {0}")]
    Timeout(String),
}

/// Which step produced a `RemoteError`; decides how it is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Call,
}

impl RemoteError {
    pub fn is_stale(&self) -> bool { matches!(self, RemoteError::StaleCredential(_)) }
    pub fn is_unsupported(&self) -> bool { matches!(self, RemoteError::Unsupported(_)) }

    /// Map onto the gateway taxonomy. A timeout while connecting is a connection
    /// failure; a timeout during a call is a failed call.
    pub fn classify(self, phase: Phase) -> AppError {
        match (self, phase) {
            (RemoteError::AuthFault(m), Phase::Connect) => AppError::unauthorized(m),
            (RemoteError::AuthFault(m), Phase::Call) => AppError::forbidden(m),
            (RemoteError::StaleCredential(m), _) => AppError::unauthorized(m),
            (RemoteError::Unsupported(m), _) => AppError::unsupported(m),
            (RemoteError::NotFound(kind), _) => AppError::not_found(kind),
            (RemoteError::Failed(m), Phase::Connect) => AppError::connection(m),
            (RemoteError::Failed(m), Phase::Call) => AppError::remote(m),
            (RemoteError::Transport(m), _) => AppError::connection(m),
            (RemoteError::Timeout(m), Phase::Connect) => AppError::connection(format!("timed out: {}", m)),
            (RemoteError::Timeout(m), Phase::Call) => AppError::remote(format!("timed out: {}", m)),
        }
    }
}

/// One facade call: `{"type": facade, "version": n, "request": name, "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    #[serde(rename = "type")]
    pub facade: String,
    pub version: u32,
    pub request: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(facade: &str, version: u32, request: &str, params: Value) -> Self {
        Self { facade: facade.to_string(), version, request: request.to_string(), params }
    }

    /// `Facade.Request`, used in logs and by fakes.
    pub fn method(&self) -> String { format!("{}.{}", self.facade, self.request) }
}

impl fmt::Display for RpcRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}.{}(v{})", self.facade, self.request, self.version) }
}

/// Bulk calls answer `{"results": [{"result"?: ..., "error"?: {"code", "message"}}]}`.
/// Returns the error of an entity entry, if it carries one.
pub fn entity_error(entry: &Value) -> Option<RemoteError> {
    let err = entry.get("error")?;
    if err.is_null() { return None; }
    let code = err.get("code").and_then(Value::as_str).unwrap_or("");
    let message = err.get("message").and_then(Value::as_str).unwrap_or("remote error");
    Some(classify_rpc_error(code, message))
}

/// First entry of a bulk reply, unwrapped from `result` when present.
pub fn first_result(reply: &Value) -> Result<Value, RemoteError> {
    let entry = reply
        .get("results")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .ok_or_else(|| RemoteError::Failed("malformed response: empty results".into()))?;
    if let Some(e) = entity_error(entry) { return Err(e); }
    Ok(entry.get("result").cloned().unwrap_or_else(|| entry.clone()))
}

#[async_trait]
pub trait RemoteConnection: Send {
    async fn call(&mut self, req: &RpcRequest) -> Result<Value, RemoteError>;
    /// Release the connection. Called at most once per connection.
    async fn close(&mut self);
}

#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Connect and log in. `model_uuid` selects a model connection instead of the
    /// controller connection.
    async fn connect(&self, cred: &CredentialToken, model_uuid: Option<&str>) -> Result<Box<dyn RemoteConnection>, RemoteError>;
}
