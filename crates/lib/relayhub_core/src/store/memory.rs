//! In-memory store backed by `DashMap`.
//!
//! Each account and each appliance document sits behind its own shard lock,
//! so every method is atomic per document the way a document store is.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::{ApplianceStore, CredentialStore, StoreError, TokenPair};
use crate::models::{
    AuthorizationGrant, Catalog, NewAccount, ProvisionedDevice, ReportStateInfo, StateUpdate,
    UserAccount,
};

/// Volatile store for tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<String, UserAccount>,
    provisioned: DashMap<String, Vec<ProvisionedDevice>>,
    catalogs: DashMap<String, Catalog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of an account, for inspection.
    pub fn account(&self, user_id: &str) -> Option<UserAccount> {
        self.accounts.get(user_id).map(|a| a.clone())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_account(&self, account: NewAccount) -> Result<String, StoreError> {
        if self.accounts.iter().any(|a| a.email == account.email) {
            return Err(StoreError::Conflict(format!(
                "email already registered: {}",
                account.email
            )));
        }
        let id = Uuid::new_v4().to_string();
        self.accounts.insert(
            id.clone(),
            UserAccount {
                id: id.clone(),
                email: account.email,
                password_hash: account.password_hash,
                authorization: None,
                access_token: None,
                refresh_token: None,
                access_date: None,
                report_state: false,
                device_jwt_psk: account.device_jwt_psk,
            },
        );
        Ok(id)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<(String, String)>, StoreError> {
        Ok(self
            .accounts
            .iter()
            .find(|a| a.email == email)
            .map(|a| (a.id.clone(), a.password_hash.clone())))
    }

    async fn set_authorization(
        &self,
        user_id: &str,
        grant: &AuthorizationGrant,
    ) -> Result<(), StoreError> {
        if let Some(mut account) = self.accounts.get_mut(user_id) {
            account.authorization = Some(grant.clone());
        }
        Ok(())
    }

    async fn find_by_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<(String, AuthorizationGrant)>, StoreError> {
        Ok(self.accounts.iter().find_map(|a| {
            a.authorization
                .as_ref()
                .filter(|g| g.code == code)
                .map(|g| (a.id.clone(), g.clone()))
        }))
    }

    async fn finalize_tokens(
        &self,
        user_id: &str,
        code: &str,
        tokens: &TokenPair,
    ) -> Result<bool, StoreError> {
        let Some(mut account) = self.accounts.get_mut(user_id) else {
            return Ok(false);
        };
        if account.authorization.as_ref().is_none_or(|g| g.code != code) {
            debug!(user_id, "authorization code no longer pending");
            return Ok(false);
        }
        account.authorization = None;
        account.access_token = Some(tokens.access_token.clone());
        account.refresh_token = Some(tokens.refresh_token.clone());
        account.access_date = Some(Utc::now());
        account.report_state = true;
        Ok(true)
    }

    async fn rotate_access_token(
        &self,
        user_id: &str,
        refresh_token: &str,
        access_token: &str,
    ) -> Result<bool, StoreError> {
        let Some(mut account) = self.accounts.get_mut(user_id) else {
            return Ok(false);
        };
        if account.refresh_token.as_deref() != Some(refresh_token) {
            return Ok(false);
        }
        account.access_token = Some(access_token.to_string());
        account.access_date = Some(Utc::now());
        Ok(true)
    }

    async fn access_token_matches(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .accounts
            .get(user_id)
            .is_some_and(|a| a.access_token.as_deref() == Some(access_token)))
    }

    async fn clear_tokens(&self, user_id: &str) -> Result<(), StoreError> {
        if let Some(mut account) = self.accounts.get_mut(user_id) {
            account.authorization = None;
            account.access_token = None;
            account.refresh_token = None;
            account.access_date = None;
            account.report_state = false;
        }
        Ok(())
    }

    async fn report_state_info(
        &self,
        user_id: &str,
    ) -> Result<Option<ReportStateInfo>, StoreError> {
        Ok(self.accounts.get(user_id).map(|a| ReportStateInfo {
            device_jwt_psk: a.device_jwt_psk.clone(),
            enabled: a.report_state,
        }))
    }
}

#[async_trait]
impl ApplianceStore for MemoryStore {
    async fn provisioned_devices(
        &self,
        user_id: &str,
    ) -> Result<Option<Vec<ProvisionedDevice>>, StoreError> {
        Ok(self.provisioned.get(user_id).map(|d| d.clone()))
    }

    async fn set_provisioned_devices(
        &self,
        user_id: &str,
        devices: &[ProvisionedDevice],
    ) -> Result<(), StoreError> {
        self.provisioned.insert(user_id.to_string(), devices.to_vec());
        Ok(())
    }

    async fn replace_catalog(&self, user_id: &str, catalog: &Catalog) -> Result<(), StoreError> {
        self.catalogs.insert(user_id.to_string(), catalog.clone());
        Ok(())
    }

    async fn load_catalog(&self, user_id: &str) -> Result<Option<Catalog>, StoreError> {
        Ok(self.catalogs.get(user_id).map(|c| c.clone()))
    }

    async fn update_catalog(
        &self,
        user_id: &str,
        update: &StateUpdate,
    ) -> Result<bool, StoreError> {
        let Some(mut catalog) = self.catalogs.get_mut(user_id) else {
            return Ok(false);
        };
        match catalog.apply(update) {
            Ok(()) => Ok(true),
            Err(rejection) => {
                debug!(user_id, %rejection, "state update rejected");
                Ok(false)
            }
        }
    }

    async fn delete_catalog(&self, user_id: &str) -> Result<(), StoreError> {
        self.catalogs.remove(user_id);
        Ok(())
    }
}
