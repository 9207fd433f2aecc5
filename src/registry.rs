//! Controller registry.
//! Loaded at startup from the controllers file and shared (behind an `Arc`) by the
//! gate, the resolver, the session manager and the invoker. Controllers created or
//! destroyed through the gateway are written back to the same file. Readers get owned
//! copies, so no lock is held across a remote call.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::{ClusterKind, ClusterType};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ClusterKind,
    /// `host:port` of the controller API.
    pub endpoint: String,
    #[serde(default)]
    pub region: Option<String>,
}

impl ControllerRecord {
    pub fn cluster(&self) -> &'static dyn ClusterType { self.kind.handler() }

    fn check(&self) -> Result<()> {
        crate::ident::check_name("controller", &self.name).map_err(|e| anyhow!(e.to_string()))?;
        if self.endpoint.trim().is_empty() {
            return Err(anyhow!("controller '{}' has no endpoint", self.name));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ControllerRegistry {
    path: Option<PathBuf>,
    controllers: RwLock<BTreeMap<String, ControllerRecord>>,
    writer: tokio::sync::Mutex<()>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    controllers: Vec<ControllerRecord>,
}

impl ControllerRegistry {
    /// Registry that lives in memory only.
    pub fn from_records<I: IntoIterator<Item = ControllerRecord>>(records: I) -> Result<Self> {
        let mut controllers = BTreeMap::new();
        for rec in records {
            rec.check()?;
            if controllers.insert(rec.name.clone(), rec.clone()).is_some() {
                return Err(anyhow!("controller '{}' is registered twice", rec.name));
            }
        }
        Ok(Self { path: None, controllers: RwLock::new(controllers), writer: tokio::sync::Mutex::new(()) })
    }

    /// Load `{"controllers": [{"name", "type", "endpoint", "region"?}, ...]}`. Changes
    /// are written back to `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading controllers file {}", path.display()))?;
        let file: RegistryFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing controllers file {}", path.display()))?;
        let mut reg = Self::from_records(file.controllers)?;
        reg.path = Some(path.to_path_buf());
        info!(target: "sojobo::registry", "loaded {} controller(s): {:?}", reg.len(), reg.names());
        Ok(reg)
    }

    pub fn get(&self, name: &str) -> Option<ControllerRecord> { self.controllers.read().get(name).cloned() }
    pub fn contains(&self, name: &str) -> bool { self.controllers.read().contains_key(name) }
    pub fn names(&self) -> Vec<String> { self.controllers.read().keys().cloned().collect() }
    pub fn records(&self) -> Vec<ControllerRecord> { self.controllers.read().values().cloned().collect() }
    /// First controller in name order; used for the liveness probe.
    pub fn first(&self) -> Option<ControllerRecord> { self.controllers.read().values().next().cloned() }
    pub fn len(&self) -> usize { self.controllers.read().len() }
    pub fn is_empty(&self) -> bool { self.controllers.read().is_empty() }

    /// Register a new controller. `Conflict` when the name is taken.
    pub async fn insert(&self, rec: ControllerRecord) -> AppResult<()> {
        rec.check().map_err(|e| AppError::invalid(e.to_string()))?;
        let _turn = self.writer.lock().await;
        let mut next = self.controllers.read().clone();
        if next.contains_key(&rec.name) {
            return Err(AppError::conflict("controller"));
        }
        info!(target: "sojobo::registry", "registering controller {} ({}) at {}", rec.name, rec.kind, rec.endpoint);
        next.insert(rec.name.clone(), rec);
        self.persist(&next).await?;
        *self.controllers.write() = next;
        Ok(())
    }

    /// Drop a controller; returns the removed record.
    pub async fn remove(&self, name: &str) -> AppResult<Option<ControllerRecord>> {
        let _turn = self.writer.lock().await;
        let mut next = self.controllers.read().clone();
        let Some(gone) = next.remove(name) else { return Ok(None); };
        self.persist(&next).await?;
        *self.controllers.write() = next;
        info!(target: "sojobo::registry", "unregistered controller {}", name);
        Ok(Some(gone))
    }

    async fn persist(&self, controllers: &BTreeMap<String, ControllerRecord>) -> AppResult<()> {
        let Some(path) = self.path.clone() else { return Ok(()); };
        let file = RegistryFile { controllers: controllers.values().cloned().collect() };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| AppError::internal(format!("controllers file: {}", e)))?;
        tokio::task::spawn_blocking(move || {
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, &path)).map_err(|e| {
                warn!(target: "sojobo::registry", "failed to write {}: {}", path.display(), e);
                AppError::internal(format!("controllers file write failed: {}", e))
            })
        })
        .await
        .map_err(|e| AppError::internal(format!("controllers file writer: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, kind: ClusterKind) -> ControllerRecord {
        ControllerRecord { name: name.into(), kind, endpoint: format!("{name}.example:17070"), region: None }
    }

    #[test]
    fn loads_file_and_orders_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("controllers.json");
        std::fs::write(&p, r#"{"controllers":[
            {"name":"staging","type":"google","endpoint":"10.1.0.1:17070","region":"europe-west1"},
            {"name":"prod","type":"aws","endpoint":"10.0.0.1:17070"}]}"#).unwrap();
        let reg = ControllerRegistry::from_file(&p).unwrap();
        assert_eq!(reg.names(), vec!["prod", "staging"]);
        assert_eq!(reg.first().unwrap().name, "prod");
        assert_eq!(reg.get("staging").unwrap().kind, ClusterKind::Google);
        assert!(!reg.contains("dev"));
    }

    #[test]
    fn rejects_duplicates_and_bad_names() {
        assert!(ControllerRegistry::from_records(vec![rec("a", ClusterKind::Aws), rec("a", ClusterKind::Lxd)]).is_err());
        assert!(ControllerRegistry::from_records(vec![rec("bad name", ClusterKind::Aws)]).is_err());
    }

    #[tokio::test]
    async fn created_controllers_are_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("controllers.json");
        std::fs::write(&p, r#"{"controllers":[{"name":"prod","type":"aws","endpoint":"10.0.0.1:17070"}]}"#).unwrap();
        let reg = ControllerRegistry::from_file(&p).unwrap();

        reg.insert(rec("edge", ClusterKind::Lxd)).await.unwrap();
        assert_eq!(reg.insert(rec("edge", ClusterKind::Aws)).await.unwrap_err(), AppError::conflict("controller"));
        assert_eq!(ControllerRegistry::from_file(&p).unwrap().names(), vec!["edge", "prod"]);

        assert_eq!(reg.remove("prod").await.unwrap().map(|r| r.kind), Some(ClusterKind::Aws));
        assert!(reg.remove("prod").await.unwrap().is_none());
        let reloaded = ControllerRegistry::from_file(&p).unwrap();
        assert_eq!(reloaded.names(), vec!["edge"]);
        assert_eq!(reloaded.first().unwrap().kind, ClusterKind::Lxd);
    }

    #[tokio::test]
    async fn in_memory_registry_accepts_changes() {
        let reg = ControllerRegistry::from_records(vec![rec("a", ClusterKind::Aws)]).unwrap();
        reg.insert(rec("b", ClusterKind::Maas)).await.unwrap();
        assert_eq!(reg.len(), 2);
        let bad = ControllerRecord { endpoint: " ".into(), ..rec("c", ClusterKind::Aws) };
        assert!(matches!(reg.insert(bad).await.unwrap_err(), AppError::InvalidRequest { .. }));
    }
}
