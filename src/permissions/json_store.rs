//! JSON-file-backed permission store. The whole map lives in memory behind a
//! `parking_lot::RwLock`. Writers take turns: each change is applied to a copy, the
//! copy is written to disk (temp file + rename) off the async runtime, and only a
//! successful write makes it visible to readers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{PermissionRecord, PermissionStore, UserAccess};
use crate::error::{AppError, AppResult};
use crate::identity::{ControllerAccess, ModelAccess};

type Users = BTreeMap<String, UserEntry>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct ControllerGrant {
    access: ControllerAccess,
    #[serde(default)]
    models: BTreeMap<String, ModelAccess>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct UserEntry {
    #[serde(default)]
    controllers: BTreeMap<String, ControllerGrant>,
    #[serde(default)]
    ssh_keys: Vec<String>,
    #[serde(default)]
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct JsonPermissionStore {
    path: Option<PathBuf>,
    users: RwLock<Users>,
    writer: tokio::sync::Mutex<()>,
}

impl JsonPermissionStore {
    /// Store that is never written to disk (tests, dry runs).
    pub fn in_memory() -> Self {
        Self { path: None, users: RwLock::new(BTreeMap::new()), writer: tokio::sync::Mutex::new(()) }
    }

    /// Open (or start empty when missing) the snapshot at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let users = if path.exists() {
            let bytes = std::fs::read(path)?;
            if bytes.iter().all(|b| b.is_ascii_whitespace()) { BTreeMap::new() } else { serde_json::from_slice(&bytes)? }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path: Some(path.to_path_buf()), users: RwLock::new(users), writer: tokio::sync::Mutex::new(()) })
    }

    async fn persist(&self, users: &Users) -> AppResult<()> {
        let Some(path) = self.path.clone() else { return Ok(()); };
        let bytes = serde_json::to_vec_pretty(users).map_err(|e| AppError::internal(format!("permission snapshot: {}", e)))?;
        tokio::task::spawn_blocking(move || write_snapshot(&path, &bytes))
            .await
            .map_err(|e| AppError::internal(format!("permission store writer: {}", e)))?
    }

    /// Apply `change` to a copy of the map; publish it once it is on disk. `change`
    /// returns whether it modified anything.
    async fn commit(&self, change: impl FnOnce(&mut Users) -> bool) -> AppResult<()> {
        let _turn = self.writer.lock().await;
        let mut next = self.users.read().clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.persist(&next).await?;
        *self.users.write() = next;
        Ok(())
    }

    async fn mutate(&self, account: &str, f: impl FnOnce(&mut UserEntry)) -> AppResult<()> {
        self.commit(|users| {
            let entry = users.entry(account.to_string()).or_default();
            f(entry);
            entry.updated_at = Some(chrono::Utc::now());
            true
        })
        .await
    }
}

fn write_snapshot(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let tmp = path.with_extension("json.tmp");
    if let Some(dir) = path.parent() { std::fs::create_dir_all(dir).ok(); }
    std::fs::write(&tmp, bytes)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| {
            warn!(target: "sojobo::permissions", "failed to persist {}: {}", path.display(), e);
            AppError::internal(format!("permission store write failed: {}", e))
        })
}

#[async_trait]
impl PermissionStore for JsonPermissionStore {
    async fn get_controller_access(&self, controller: &str, account: &str) -> AppResult<ControllerAccess> {
        let users = self.users.read();
        Ok(users.get(account).and_then(|u| u.controllers.get(controller)).map(|g| g.access).unwrap_or_default())
    }

    async fn get_model_access(&self, controller: &str, model: &str, account: &str) -> AppResult<ModelAccess> {
        let users = self.users.read();
        Ok(users
            .get(account)
            .and_then(|u| u.controllers.get(controller))
            .and_then(|g| g.models.get(model).copied())
            .unwrap_or_default())
    }

    async fn set_controller_access(&self, controller: &str, account: &str, access: ControllerAccess) -> AppResult<()> {
        debug!(target: "sojobo::permissions", "set controller access {}@{} = {}", account, controller, access);
        self.mutate(account, |u| {
            if access.is_valid() {
                u.controllers.entry(controller.to_string()).or_default().access = access;
            } else {
                u.controllers.remove(controller);
            }
        })
        .await
    }

    async fn set_model_access(&self, controller: &str, model: &str, account: &str, access: ModelAccess) -> AppResult<()> {
        debug!(target: "sojobo::permissions", "set model access {}@{}:{} = {}", account, controller, model, access);
        if !access.is_valid() {
            // a revoke never creates or raises the controller grant
            return self
                .commit(|users| {
                    let Some(user) = users.get_mut(account) else { return false; };
                    let removed = user.controllers.get_mut(controller).is_some_and(|g| g.models.remove(model).is_some());
                    if removed { user.updated_at = Some(chrono::Utc::now()); }
                    removed
                })
                .await;
        }
        self.mutate(account, |u| {
            let grant = u.controllers.entry(controller.to_string()).or_default();
            // a model grant implies at least login on its controller
            if !grant.access.is_valid() { grant.access = ControllerAccess::Login; }
            grant.models.insert(model.to_string(), access);
        })
        .await
    }

    async fn list_controller_users(&self, controller: &str) -> AppResult<Vec<UserAccess<ControllerAccess>>> {
        let users = self.users.read();
        Ok(users
            .iter()
            .filter_map(|(name, u)| u.controllers.get(controller).map(|g| UserAccess { name: name.clone(), access: g.access }))
            .collect())
    }

    async fn list_model_users(&self, controller: &str, model: &str) -> AppResult<Vec<UserAccess<ModelAccess>>> {
        let users = self.users.read();
        Ok(users
            .iter()
            .filter_map(|(name, u)| {
                u.controllers.get(controller).and_then(|g| g.models.get(model)).map(|a| UserAccess { name: name.clone(), access: *a })
            })
            .collect())
    }

    async fn record(&self, controller: &str, account: &str) -> AppResult<Option<PermissionRecord>> {
        let users = self.users.read();
        Ok(users.get(account).and_then(|u| u.controllers.get(controller)).map(|g| PermissionRecord {
            controller: controller.to_string(),
            account: account.to_string(),
            access: g.access,
            models: g.models.iter().map(|(m, a)| (m.clone(), *a)).collect(),
        }))
    }

    async fn forget_model(&self, controller: &str, model: &str) -> AppResult<()> {
        self.commit(|users| {
            let mut touched = false;
            for u in users.values_mut() {
                if let Some(g) = u.controllers.get_mut(controller) {
                    touched |= g.models.remove(model).is_some();
                }
            }
            touched
        })
        .await
    }

    async fn forget_controller(&self, controller: &str) -> AppResult<()> {
        self.commit(|users| {
            let mut touched = false;
            for u in users.values_mut() {
                touched |= u.controllers.remove(controller).is_some();
            }
            touched
        })
        .await
    }

    async fn accounts(&self) -> AppResult<Vec<String>> {
        Ok(self.users.read().keys().cloned().collect())
    }

    async fn forget_account(&self, account: &str) -> AppResult<()> {
        self.commit(|users| users.remove(account).is_some()).await
    }

    async fn ssh_keys(&self, account: &str) -> AppResult<Vec<String>> {
        Ok(self.users.read().get(account).map(|u| u.ssh_keys.clone()).unwrap_or_default())
    }

    async fn add_ssh_key(&self, account: &str, key: &str) -> AppResult<()> {
        self.mutate(account, |u| {
            if !u.ssh_keys.iter().any(|k| k == key) { u.ssh_keys.push(key.to_string()); }
        })
        .await
    }

    async fn remove_ssh_key(&self, account: &str, key: &str) -> AppResult<()> {
        self.mutate(account, |u| u.ssh_keys.retain(|k| k != key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_grant_is_none() {
        let s = JsonPermissionStore::in_memory();
        assert_eq!(s.get_controller_access("prod", "bob").await.unwrap(), ControllerAccess::None);
        assert_eq!(s.get_model_access("prod", "m", "bob").await.unwrap(), ModelAccess::None);
        assert!(s.record("prod", "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn model_grant_implies_login_and_revoke_removes() {
        let s = JsonPermissionStore::in_memory();
        s.set_model_access("prod", "dev", "bob", ModelAccess::Write).await.unwrap();
        assert_eq!(s.get_controller_access("prod", "bob").await.unwrap(), ControllerAccess::Login);
        let rec = s.record("prod", "bob").await.unwrap().unwrap();
        assert_eq!(rec.models, vec![("dev".to_string(), ModelAccess::Write)]);
        s.set_model_access("prod", "dev", "bob", ModelAccess::None).await.unwrap();
        assert_eq!(s.get_model_access("prod", "dev", "bob").await.unwrap(), ModelAccess::None);
        s.set_controller_access("prod", "bob", ControllerAccess::None).await.unwrap();
        assert!(s.list_controller_users("prod").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("permissions.json");
        {
            let s = JsonPermissionStore::open(&p).unwrap();
            s.set_controller_access("prod", "alice", ControllerAccess::Superuser).await.unwrap();
            s.set_model_access("prod", "web", "bob", ModelAccess::Read).await.unwrap();
            s.add_ssh_key("bob", "ssh-rsa AAAA bob@laptop").await.unwrap();
            s.add_ssh_key("bob", "ssh-rsa AAAA bob@laptop").await.unwrap();
        }
        let s = JsonPermissionStore::open(&p).unwrap();
        assert_eq!(s.get_controller_access("prod", "alice").await.unwrap(), ControllerAccess::Superuser);
        let users = s.list_model_users("prod", "web").await.unwrap();
        assert_eq!(users, vec![UserAccess { name: "bob".into(), access: ModelAccess::Read }]);
        assert_eq!(s.ssh_keys("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forget_model_drops_all_grants() {
        let s = JsonPermissionStore::in_memory();
        s.set_model_access("prod", "web", "bob", ModelAccess::Read).await.unwrap();
        s.set_model_access("prod", "web", "carol", ModelAccess::Admin).await.unwrap();
        s.forget_model("prod", "web").await.unwrap();
        assert!(s.list_model_users("prod", "web").await.unwrap().is_empty());
        assert_eq!(s.get_controller_access("prod", "carol").await.unwrap(), ControllerAccess::Login);
    }

    #[tokio::test]
    async fn revoking_without_a_grant_leaves_the_controller_hidden() {
        let s = JsonPermissionStore::in_memory();
        s.set_model_access("prod", "dev", "eve", ModelAccess::None).await.unwrap();
        assert_eq!(s.get_controller_access("prod", "eve").await.unwrap(), ControllerAccess::None);
        assert!(s.record("prod", "eve").await.unwrap().is_none());
        assert!(s.accounts().await.unwrap().is_empty());

        // a revoke on one model keeps the other grants and the controller level as they were
        s.set_controller_access("prod", "bob", ControllerAccess::AddModel).await.unwrap();
        s.set_model_access("prod", "web", "bob", ModelAccess::Read).await.unwrap();
        s.set_model_access("prod", "dev", "bob", ModelAccess::None).await.unwrap();
        s.set_model_access("staging", "dev", "bob", ModelAccess::None).await.unwrap();
        assert_eq!(s.get_controller_access("prod", "bob").await.unwrap(), ControllerAccess::AddModel);
        assert_eq!(s.get_controller_access("staging", "bob").await.unwrap(), ControllerAccess::None);
        assert_eq!(s.get_model_access("prod", "web", "bob").await.unwrap(), ModelAccess::Read);
    }

    #[tokio::test]
    async fn failed_write_leaves_grants_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        // the snapshot would have to live under a regular file
        let s = JsonPermissionStore::open(&blocker.join("permissions.json")).unwrap();
        assert!(s.set_controller_access("prod", "mallory", ControllerAccess::Superuser).await.is_err());
        assert_eq!(s.get_controller_access("prod", "mallory").await.unwrap(), ControllerAccess::None);
        assert!(s.add_ssh_key("mallory", "ssh-rsa AAAA m@x").await.is_err());
        assert!(s.ssh_keys("mallory").await.unwrap().is_empty());
        assert!(s.accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forgetting_controllers_and_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("permissions.json");
        let s = JsonPermissionStore::open(&p).unwrap();
        s.set_controller_access("prod", "alice", ControllerAccess::Superuser).await.unwrap();
        s.set_model_access("staging", "web", "alice", ModelAccess::Write).await.unwrap();
        s.set_model_access("prod", "web", "bob", ModelAccess::Read).await.unwrap();
        assert_eq!(s.accounts().await.unwrap(), vec!["alice".to_string(), "bob".to_string()]);

        s.forget_controller("prod").await.unwrap();
        assert!(s.list_controller_users("prod").await.unwrap().is_empty());
        assert_eq!(s.get_model_access("staging", "web", "alice").await.unwrap(), ModelAccess::Write);

        s.forget_account("alice").await.unwrap();
        let reopened = JsonPermissionStore::open(&p).unwrap();
        assert_eq!(reopened.accounts().await.unwrap(), vec!["bob".to_string()]);
        assert!(reopened.record("staging", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_writers_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("permissions.json");
        let s = std::sync::Arc::new(JsonPermissionStore::open(&p).unwrap());
        let mut handles = Vec::new();
        for i in 0..16 {
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                s.set_controller_access("prod", &format!("user{i}"), ControllerAccess::Login).await.unwrap();
            }));
        }
        for h in handles { h.await.unwrap(); }
        assert_eq!(JsonPermissionStore::open(&p).unwrap().list_controller_users("prod").await.unwrap().len(), 16);
    }
}
