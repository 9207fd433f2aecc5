//! Gateway configuration.
//! Settings resolve in layers: built-in defaults, then an optional JSON file, then
//! environment variables, then command-line flags (applied by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Built-in defaults; every field has a value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefaultSettings {
    pub http_port: u16,
    pub admin_user: String,
    pub controllers_file: PathBuf,
    pub permissions_file: PathBuf,
    pub cli_binary: String,
    pub connect_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub charm_store_url: String,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            http_port: 5000,
            admin_user: "admin".to_string(),
            controllers_file: PathBuf::from("controllers.json"),
            permissions_file: PathBuf::from("permissions.json"),
            cli_binary: "juju".to_string(),
            connect_timeout_ms: 10_000,
            call_timeout_ms: 60_000,
            charm_store_url: "https://api.jujucharms.com/v4".to_string(),
        }
    }
}

/// One overriding layer (config file or environment). Unset values inherit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SettingsLayer {
    pub http_port: Option<u16>,
    /// Plain secret or an Argon2 PHC string (`$argon2id$...`).
    pub api_key: Option<String>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    pub controllers_file: Option<PathBuf>,
    pub permissions_file: Option<PathBuf>,
    pub cli_binary: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub call_timeout_ms: Option<u64>,
    pub charm_store_url: Option<String>,
    pub local_charm_dir: Option<PathBuf>,
}

impl SettingsLayer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Read the `SOJOBO_*` / `JUJU_ADMIN_*` variables through `lookup` (usually `std::env::var`).
    pub fn from_env_with<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let num = |k: &str| lookup(k).and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            http_port: lookup("SOJOBO_HTTP_PORT").and_then(|v| v.trim().parse::<u16>().ok()),
            api_key: lookup("SOJOBO_API_KEY"),
            admin_user: lookup("JUJU_ADMIN_USER"),
            admin_password: lookup("JUJU_ADMIN_PASSWORD"),
            controllers_file: lookup("SOJOBO_CONTROLLERS").map(PathBuf::from),
            permissions_file: lookup("SOJOBO_PERMISSIONS").map(PathBuf::from),
            cli_binary: lookup("SOJOBO_CLI"),
            connect_timeout_ms: num("SOJOBO_CONNECT_TIMEOUT_MS"),
            call_timeout_ms: num("SOJOBO_CALL_TIMEOUT_MS"),
            charm_store_url: lookup("SOJOBO_CHARM_STORE"),
            local_charm_dir: lookup("LOCAL_CHARM_DIR").map(PathBuf::from),
        }
    }

    pub fn from_env() -> Self { Self::from_env_with(|k| std::env::var(k).ok()) }

    /// Overlay `other` on top of `self`; set values in `other` win.
    pub fn overlay(self, other: SettingsLayer) -> Self {
        Self {
            http_port: other.http_port.or(self.http_port),
            api_key: other.api_key.or(self.api_key),
            admin_user: other.admin_user.or(self.admin_user),
            admin_password: other.admin_password.or(self.admin_password),
            controllers_file: other.controllers_file.or(self.controllers_file),
            permissions_file: other.permissions_file.or(self.permissions_file),
            cli_binary: other.cli_binary.or(self.cli_binary),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            call_timeout_ms: other.call_timeout_ms.or(self.call_timeout_ms),
            charm_store_url: other.charm_store_url.or(self.charm_store_url),
            local_charm_dir: other.local_charm_dir.or(self.local_charm_dir),
        }
    }
}

/// Fully resolved configuration used at runtime.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    pub http_port: u16,
    pub api_key: String,
    pub admin_user: String,
    pub admin_password: String,
    pub controllers_file: PathBuf,
    pub permissions_file: PathBuf,
    pub cli_binary: String,
    pub connect_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub charm_store_url: String,
    pub local_charm_dir: Option<PathBuf>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("http_port", &self.http_port)
            .field("api_key", &"<redacted>")
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"<redacted>")
            .field("controllers_file", &self.controllers_file)
            .field("permissions_file", &self.permissions_file)
            .field("cli_binary", &self.cli_binary)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("call_timeout_ms", &self.call_timeout_ms)
            .field("charm_store_url", &self.charm_store_url)
            .field("local_charm_dir", &self.local_charm_dir)
            .finish()
    }
}

impl GatewayConfig {
    /// Build the effective config from defaults plus one merged override layer.
    pub fn from_layers(defaults: &DefaultSettings, layer: &SettingsLayer) -> Result<Self> {
        let api_key = layer.api_key.clone().filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("api key is not configured (SOJOBO_API_KEY)"))?;
        let admin_password = layer.admin_password.clone().filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("administrator password is not configured (JUJU_ADMIN_PASSWORD)"))?;
        let cfg = Self {
            http_port: layer.http_port.unwrap_or(defaults.http_port),
            api_key: api_key.trim().to_string(),
            admin_user: layer.admin_user.clone().unwrap_or_else(|| defaults.admin_user.clone()),
            admin_password,
            controllers_file: layer.controllers_file.clone().unwrap_or_else(|| defaults.controllers_file.clone()),
            permissions_file: layer.permissions_file.clone().unwrap_or_else(|| defaults.permissions_file.clone()),
            cli_binary: layer.cli_binary.clone().unwrap_or_else(|| defaults.cli_binary.clone()),
            connect_timeout_ms: layer.connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms),
            call_timeout_ms: layer.call_timeout_ms.unwrap_or(defaults.call_timeout_ms),
            charm_store_url: layer.charm_store_url.clone().unwrap_or_else(|| defaults.charm_store_url.clone()),
            local_charm_dir: layer.local_charm_dir.clone(),
        };
        if cfg.connect_timeout_ms == 0 || cfg.call_timeout_ms == 0 {
            return Err(anyhow!("timeouts must be greater than zero"));
        }
        Ok(cfg)
    }

    /// Defaults → optional file → process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut layer = SettingsLayer::default();
        if let Some(p) = file { layer = layer.overlay(SettingsLayer::from_file(p)?); }
        layer = layer.overlay(SettingsLayer::from_env());
        Self::from_layers(&DefaultSettings::default(), &layer)
    }

    pub fn connect_timeout(&self) -> Duration { Duration::from_millis(self.connect_timeout_ms) }
    pub fn call_timeout(&self) -> Duration { Duration::from_millis(self.call_timeout_ms) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> SettingsLayer {
        let m: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        SettingsLayer::from_env_with(|k| m.get(k).cloned())
    }

    #[test]
    fn precedence_defaults_file_env() {
        let file = SettingsLayer {
            api_key: Some("file-key".into()),
            admin_password: Some("file-pw".into()),
            http_port: Some(6000),
            call_timeout_ms: Some(1_000),
            ..Default::default()
        };
        let layer = file.overlay(env(&[("SOJOBO_API_KEY", "env-key"), ("SOJOBO_CONNECT_TIMEOUT_MS", "250")]));
        let cfg = GatewayConfig::from_layers(&DefaultSettings::default(), &layer).unwrap();
        assert_eq!(cfg.api_key, "env-key");
        assert_eq!(cfg.admin_password, "file-pw");
        assert_eq!(cfg.http_port, 6000);
        assert_eq!(cfg.connect_timeout_ms, 250);
        assert_eq!(cfg.call_timeout_ms, 1_000);
        assert_eq!(cfg.admin_user, "admin");
        assert_eq!(cfg.cli_binary, "juju");
    }

    #[test]
    fn missing_secrets_are_rejected() {
        let layer = env(&[("JUJU_ADMIN_PASSWORD", "pw")]);
        assert!(GatewayConfig::from_layers(&DefaultSettings::default(), &layer).is_err());
        let layer = env(&[("SOJOBO_API_KEY", "k")]);
        assert!(GatewayConfig::from_layers(&DefaultSettings::default(), &layer).is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let layer = env(&[("SOJOBO_API_KEY", "topsecretkey"), ("JUJU_ADMIN_PASSWORD", "hunter2")]);
        let cfg = GatewayConfig::from_layers(&DefaultSettings::default(), &layer).unwrap();
        let s = format!("{:?}", cfg);
        assert!(!s.contains("topsecretkey"));
        assert!(!s.contains("hunter2"));
    }

    #[test]
    fn file_layer_parses_json() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("sojobo.json");
        std::fs::write(&p, r#"{"api_key":"k","admin_password":"pw","cli_binary":"/snap/bin/juju"}"#).unwrap();
        let layer = SettingsLayer::from_file(&p).unwrap();
        let cfg = GatewayConfig::from_layers(&DefaultSettings::default(), &layer).unwrap();
        assert_eq!(cfg.cli_binary, "/snap/bin/juju");
    }
}
