//! Permission cache.
//! Maps (controller, account) to a controller access level and (controller, model,
//! account) to a model access level. This is the cheap path consulted before any live
//! session is opened; the gateway writes it whenever it grants or revokes access.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::identity::{ControllerAccess, ModelAccess};

mod json_store;

pub use json_store::JsonPermissionStore;

/// One account's grants on one controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub controller: String,
    pub account: String,
    pub access: ControllerAccess,
    #[serde(default)]
    pub models: Vec<(String, ModelAccess)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccess<L> {
    pub name: String,
    pub access: L,
}

/// Point reads and writes keyed by (controller[, model], account). Implementations
/// serialize conflicting writes themselves.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// `ControllerAccess::None` when no grant exists.
    async fn get_controller_access(&self, controller: &str, account: &str) -> AppResult<ControllerAccess>;
    /// `ModelAccess::None` when no grant exists.
    async fn get_model_access(&self, controller: &str, model: &str, account: &str) -> AppResult<ModelAccess>;
    /// Setting `None` removes the controller grant together with its model grants.
    async fn set_controller_access(&self, controller: &str, account: &str, access: ControllerAccess) -> AppResult<()>;
    /// Setting `None` removes the model grant.
    async fn set_model_access(&self, controller: &str, model: &str, account: &str, access: ModelAccess) -> AppResult<()>;
    async fn list_controller_users(&self, controller: &str) -> AppResult<Vec<UserAccess<ControllerAccess>>>;
    async fn list_model_users(&self, controller: &str, model: &str) -> AppResult<Vec<UserAccess<ModelAccess>>>;
    async fn record(&self, controller: &str, account: &str) -> AppResult<Option<PermissionRecord>>;
    /// Drop every grant on a destroyed model.
    async fn forget_model(&self, controller: &str, model: &str) -> AppResult<()>;
    /// Drop every grant on a destroyed controller.
    async fn forget_controller(&self, controller: &str) -> AppResult<()>;
    /// Accounts holding any grant or key, in name order.
    async fn accounts(&self) -> AppResult<Vec<String>>;
    /// Drop everything stored for a removed account.
    async fn forget_account(&self, account: &str) -> AppResult<()>;

    async fn ssh_keys(&self, account: &str) -> AppResult<Vec<String>>;
    async fn add_ssh_key(&self, account: &str, key: &str) -> AppResult<()>;
    async fn remove_ssh_key(&self, account: &str, key: &str) -> AppResult<()>;
}
