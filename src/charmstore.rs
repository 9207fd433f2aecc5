//! Charm store lookups: which OS series a published charm supports.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, AppResult};

pub struct CharmStore {
    base: String,
    client: reqwest::Client,
}

impl CharmStore {
    pub fn new(base: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base: base.trim_end_matches('/').to_string(), client })
    }

    /// Series the charm is published for. `None` for `local:` charms, which are not
    /// looked up.
    pub async fn supported_series(&self, charm: &str) -> AppResult<Option<Vec<String>>> {
        if charm.starts_with("local:") {
            return Ok(None);
        }
        let name = charm.trim_start_matches("cs:");
        let url = format!("{}/{}/expand-id", self.base, name);
        debug!(target: "sojobo::charmstore", "GET {}", url);
        let resp = self.client.get(&url).send().await.map_err(|e| AppError::remote(format!("charm store: {}", e)))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::not_found("charm"));
        }
        if !resp.status().is_success() {
            return Err(AppError::remote(format!("charm store returned HTTP {}", resp.status())));
        }
        let v: Value = resp.json().await.map_err(|e| AppError::remote(format!("charm store: {}", e)))?;
        Ok(Some(series_from_expand_id(&v)))
    }
}

/// `[{"Id": "cs:xenial/mysql-58"}, {"Id": "cs:trusty/mysql-57"}]` -> `["xenial", "trusty"]`.
pub fn series_from_expand_id(v: &Value) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for entry in v.as_array().into_iter().flatten() {
        let Some(id) = entry.get("Id").and_then(Value::as_str) else { continue };
        let path = id.split_once(':').map(|(_, p)| p).unwrap_or(id);
        let path = path.strip_prefix('~').and_then(|p| p.split_once('/')).map(|(_, rest)| rest).unwrap_or(path);
        if let Some((series, _)) = path.split_once('/') {
            if !out.iter().any(|s| s == series) { out.push(series.to_string()); }
        }
    }
    out
}
