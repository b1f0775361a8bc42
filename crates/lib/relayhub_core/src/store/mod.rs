//! Document-store seam.
//!
//! Two collections live behind these traits: user credential records and
//! per-user appliance documents (provisioned device list plus catalog).
//! Every method is a single atomic document operation; nothing here retries.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    AuthorizationGrant, Catalog, NewAccount, ProvisionedDevice, ReportStateInfo, StateUpdate,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Corrupt document: {0}")]
    Corrupt(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Access token and refresh token minted together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// User credential records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Provision an account, returning its id.
    async fn create_account(&self, account: NewAccount) -> Result<String, StoreError>;

    /// Look up `(user_id, password_hash)` by email.
    async fn find_by_email(&self, email: &str) -> Result<Option<(String, String)>, StoreError>;

    /// Store a pending authorization code, replacing any earlier one.
    async fn set_authorization(
        &self,
        user_id: &str,
        grant: &AuthorizationGrant,
    ) -> Result<(), StoreError>;

    /// Find the account holding a pending code.
    async fn find_by_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<(String, AuthorizationGrant)>, StoreError>;

    /// Persist a token pair, clear the pending code, and enable report-state,
    /// but only if `code` is still the pending code. Returns whether it was.
    async fn finalize_tokens(
        &self,
        user_id: &str,
        code: &str,
        tokens: &TokenPair,
    ) -> Result<bool, StoreError>;

    /// Replace the access token if `refresh_token` is the stored one.
    /// Returns whether the rotation happened.
    async fn rotate_access_token(
        &self,
        user_id: &str,
        refresh_token: &str,
        access_token: &str,
    ) -> Result<bool, StoreError>;

    /// Whether `access_token` is the stored access token for `user_id`.
    async fn access_token_matches(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<bool, StoreError>;

    /// Drop tokens and any pending code; disable report-state.
    async fn clear_tokens(&self, user_id: &str) -> Result<(), StoreError>;

    async fn report_state_info(&self, user_id: &str)
    -> Result<Option<ReportStateInfo>, StoreError>;
}

/// Per-user appliance documents.
#[async_trait]
pub trait ApplianceStore: Send + Sync {
    /// Device list from the provisioning source, if one was provided.
    async fn provisioned_devices(
        &self,
        user_id: &str,
    ) -> Result<Option<Vec<ProvisionedDevice>>, StoreError>;

    async fn set_provisioned_devices(
        &self,
        user_id: &str,
        devices: &[ProvisionedDevice],
    ) -> Result<(), StoreError>;

    /// Replace (or create) the user's catalog wholesale.
    async fn replace_catalog(&self, user_id: &str, catalog: &Catalog) -> Result<(), StoreError>;

    async fn load_catalog(&self, user_id: &str) -> Result<Option<Catalog>, StoreError>;

    /// Atomically merge `update` into the stored catalog. Returns `false`,
    /// changing nothing, when there is no catalog or the update does not fit it.
    async fn update_catalog(&self, user_id: &str, update: &StateUpdate)
    -> Result<bool, StoreError>;

    async fn delete_catalog(&self, user_id: &str) -> Result<(), StoreError>;
}
