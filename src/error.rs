//! Unified gateway error model and mapping helpers.
//! Every operation (gate, resolver, invoker, business ops) returns `AppError`; the HTTP
//! layer only maps it to a status code and a JSON body.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    /// Also returned when the caller holds no visible grant on the target.
    #[error("{kind} does not exist")]
    NotFound { kind: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String },
    #[error("{kind} already exists")]
    Conflict { kind: String },
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },
    /// Internal signal between the session path and the invoker; never leaves the invoker.
    #[error("capability unsupported: {capability}")]
    CapabilityUnsupported { capability: String },
    #[error("remote call failed: {message}")]
    RemoteCallFailed { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self { AppError::InvalidRequest { message: msg.into() } }
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self { AppError::Unauthorized { message: msg.into() } }
    pub fn not_found<S: Into<String>>(kind: S) -> Self { AppError::NotFound { kind: kind.into() } }
    pub fn forbidden<S: Into<String>>(msg: S) -> Self { AppError::Forbidden { message: msg.into() } }
    pub fn conflict<S: Into<String>>(kind: S) -> Self { AppError::Conflict { kind: kind.into() } }
    pub fn connection<S: Into<String>>(msg: S) -> Self { AppError::ConnectionFailed { message: msg.into() } }
    pub fn unsupported<S: Into<String>>(cap: S) -> Self { AppError::CapabilityUnsupported { capability: cap.into() } }
    pub fn remote<S: Into<String>>(msg: S) -> Self { AppError::RemoteCallFailed { message: msg.into() } }
    pub fn internal<S: Into<String>>(msg: S) -> Self { AppError::Internal { message: msg.into() } }

    /// Stable short code used in JSON bodies and logs.
    pub fn code_str(&self) -> &'static str {
        match self {
            AppError::InvalidRequest { .. } => "invalid_request",
            AppError::Unauthorized { .. } => "unauthorized",
            AppError::NotFound { .. } => "not_found",
            AppError::Forbidden { .. } => "forbidden",
            AppError::Conflict { .. } => "conflict",
            AppError::ConnectionFailed { .. } => "connection_failed",
            AppError::CapabilityUnsupported { .. } => "capability_unsupported",
            AppError::RemoteCallFailed { .. } => "remote_call_failed",
            AppError::Internal { .. } => "internal",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::InvalidRequest { .. } => 400,
            AppError::Unauthorized { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::RemoteCallFailed { .. } => 502,
            AppError::ConnectionFailed { .. } => 503,
            // reaching the boundary with this kind is a bug in the invoker
            AppError::CapabilityUnsupported { .. } => 500,
            AppError::Internal { .. } => 500,
        }
    }

    /// JSON body returned to HTTP callers.
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({"status": "error", "code": self.code_str(), "message": self.to_string()})
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { message: format!("{:#}", err) }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::RemoteCallFailed { message: format!("malformed response: {}", err) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::invalid("oops").http_status(), 400);
        assert_eq!(AppError::unauthorized("no").http_status(), 401);
        assert_eq!(AppError::forbidden("read only").http_status(), 403);
        assert_eq!(AppError::not_found("controller").http_status(), 404);
        assert_eq!(AppError::conflict("model").http_status(), 409);
        assert_eq!(AppError::remote("boom").http_status(), 502);
        assert_eq!(AppError::connection("refused").http_status(), 503);
        assert_eq!(AppError::internal("panic").http_status(), 500);
    }

    #[test]
    fn not_found_message_names_the_kind_only() {
        let e = AppError::not_found("controller");
        assert_eq!(e.to_string(), "controller does not exist");
        let body = e.to_body();
        assert_eq!(body["code"], "not_found");
        assert_eq!(body["status"], "error");
    }

    #[test]
    fn serde_tag_is_type() {
        let v = serde_json::to_value(AppError::forbidden("x")).unwrap();
        assert_eq!(v["type"], "forbidden");
        let back: AppError = serde_json::from_value(v).unwrap();
        assert_eq!(back, AppError::forbidden("x"));
    }

    #[test]
    fn kind_field_survives_the_tag() {
        let v = serde_json::to_value(AppError::not_found("model")).unwrap();
        assert_eq!(v["type"], "not_found");
        assert_eq!(v["kind"], "model");
        let back: AppError = serde_json::from_value(v).unwrap();
        assert_eq!(back, AppError::not_found("model"));
    }

    #[test]
    fn anyhow_maps_to_internal() {
        let e: AppError = anyhow::anyhow!("disk gone").into();
        assert_eq!(e.http_status(), 500);
        assert!(matches!(e, AppError::Internal { .. }));
    }
}
