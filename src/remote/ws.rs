//! JSON-RPC over WebSocket, the wire protocol spoken by controller API servers.
//! One request is in flight per connection; replies are matched on `request-id`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{ClusterTransport, RemoteConnection, RemoteError, RpcRequest};
use crate::cluster::CredentialToken;

type Stream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const LOGIN_VERSION: u32 = 3;

/// Connects to `wss://<endpoint>/api` (controller) or `wss://<endpoint>/model/<uuid>/api`.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self { Self }

    pub fn url_for(endpoint: &str, model_uuid: Option<&str>) -> String {
        let base = if endpoint.contains("://") { endpoint.trim_end_matches('/').to_string() } else { format!("wss://{}", endpoint) };
        match model_uuid {
            Some(uuid) => format!("{}/model/{}/api", base, uuid),
            None => format!("{}/api", base),
        }
    }
}

#[async_trait]
impl ClusterTransport for WsTransport {
    async fn connect(&self, cred: &CredentialToken, model_uuid: Option<&str>) -> Result<Box<dyn RemoteConnection>, RemoteError> {
        // TODO: trust the controller CA certificate carried in the registry record instead of webpki roots
        let url = Self::url_for(&cred.endpoint, model_uuid);
        debug!(target: "sojobo::session", "ws connect {} as {}", url, cred.auth_tag);
        let (stream, _resp) = connect_async(url.as_str()).await.map_err(|e| RemoteError::Transport(format!("{}: {}", url, e)))?;
        let mut conn = WsConnection { stream: Some(stream), next_id: 0, endpoint: url };
        let login = RpcRequest::new(
            "Admin",
            LOGIN_VERSION,
            "Login",
            json!({"auth-tag": cred.auth_tag, "credentials": cred.secret, "nonce": "", "macaroons": []}),
        );
        match conn.roundtrip(&login).await {
            Ok(_) => Ok(Box::new(conn)),
            Err(e) => {
                conn.close().await;
                Err(match e {
                    RemoteError::StaleCredential(m) | RemoteError::AuthFault(m) => RemoteError::AuthFault(m),
                    other => other,
                })
            }
        }
    }
}

pub struct WsConnection {
    stream: Option<Stream>,
    next_id: u64,
    endpoint: String,
}

impl WsConnection {
    async fn roundtrip(&mut self, req: &RpcRequest) -> Result<Value, RemoteError> {
        let stream = self.stream.as_mut().ok_or_else(|| RemoteError::Transport("connection is closed".into()))?;
        self.next_id += 1;
        let id = self.next_id;
        let mut frame = serde_json::to_value(req).map_err(|e| RemoteError::Failed(e.to_string()))?;
        frame["request-id"] = json!(id);
        stream
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        while let Some(msg) = stream.next().await {
            let text = match msg.map_err(|e| RemoteError::Transport(e.to_string()))? {
                Message::Text(s) => s,
                Message::Close(_) => return Err(RemoteError::Transport(format!("{} closed the connection", self.endpoint))),
                _ => continue,
            };
            let v: Value = serde_json::from_str(&text).map_err(|e| RemoteError::Failed(format!("malformed response: {}", e)))?;
            if v.get("request-id").and_then(Value::as_u64) != Some(id) { continue; }
            if let Some(msg) = v.get("error").and_then(Value::as_str) {
                let code = v.get("error-code").and_then(Value::as_str).unwrap_or("");
                return Err(classify_rpc_error(code, msg));
            }
            return Ok(v.get("response").cloned().unwrap_or(Value::Null));
        }
        Err(RemoteError::Transport(format!("{} closed before replying", self.endpoint)))
    }
}

#[async_trait]
impl RemoteConnection for WsConnection {
    async fn call(&mut self, req: &RpcRequest) -> Result<Value, RemoteError> {
        self.roundtrip(req).await
    }

    async fn close(&mut self) {
        if let Some(mut s) = self.stream.take() {
            let _ = s.close(None).await;
        }
    }
}

/// Map an error reply (`error-code`, `error`) to a `RemoteError`. Also used for the
/// per-entity `{"error": {"code", "message"}}` objects inside bulk results.
pub fn classify_rpc_error(code: &str, message: &str) -> RemoteError {
    let lower = message.to_ascii_lowercase();
    match code {
        "login expired" => RemoteError::StaleCredential(message.to_string()),
        "unauthorized access" if lower.contains("invalid entity name or password") => RemoteError::StaleCredential(message.to_string()),
        "unauthorized access" => RemoteError::AuthFault(message.to_string()),
        "not implemented" | "not supported" => RemoteError::Unsupported(message.to_string()),
        "not found" => RemoteError::NotFound(missing_kind(&lower)),
        _ if lower.contains("unknown version") || lower.contains("unknown object type") || lower.contains("no such request") => {
            RemoteError::Unsupported(message.to_string())
        }
        _ if lower.contains("invalid entity name or password") => RemoteError::StaleCredential(message.to_string()),
        _ => RemoteError::Failed(message.to_string()),
    }
}

/// `application "mysql" not found` -> `application`.
fn missing_kind(lower: &str) -> String {
    lower
        .split_whitespace()
        .next()
        .filter(|w| w.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or("resource")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_for_controller_and_model() {
        assert_eq!(WsTransport::url_for("10.0.0.1:17070", None), "wss://10.0.0.1:17070/api");
        assert_eq!(WsTransport::url_for("ws://localhost:17070/", Some("abc")), "ws://localhost:17070/model/abc/api");
    }

    #[test]
    fn error_codes_classify() {
        assert_eq!(classify_rpc_error("unauthorized access", "permission denied"), RemoteError::AuthFault("permission denied".into()));
        assert!(classify_rpc_error("unauthorized access", "invalid entity name or password (unauthorized access)").is_stale());
        assert!(classify_rpc_error("not implemented", "ListKeys").is_unsupported());
        assert!(classify_rpc_error("", "unknown version (4) of interface \"KeyManager\"").is_unsupported());
        assert_eq!(classify_rpc_error("not found", "application \"mysql\" not found"), RemoteError::NotFound("application".into()));
        assert_eq!(classify_rpc_error("not found", "\"x\" not found"), RemoteError::NotFound("resource".into()));
        assert_eq!(classify_rpc_error("", "boom"), RemoteError::Failed("boom".into()));
    }
}
