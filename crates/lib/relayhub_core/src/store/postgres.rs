//! PostgreSQL store.
//!
//! Users are rows; provisioned devices and catalogs are JSONB documents keyed
//! by user id. Token writes are single conditional `UPDATE`s and catalog
//! merges run inside one row-locked transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{ApplianceStore, CredentialStore, StoreError, TokenPair};
use crate::models::{
    AuthorizationGrant, Catalog, NewAccount, ProvisionedDevice, ReportStateInfo, StateUpdate,
};

/// Document store over a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// User ids arrive from untrusted tokens; anything that is not a UUID cannot
/// name a row.
fn user_uuid(user_id: &str) -> Option<Uuid> {
    Uuid::parse_str(user_id).ok()
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn create_account(&self, account: NewAccount) -> Result<String, StoreError> {
        let id = sqlx::query_scalar::<_, String>(
            "INSERT INTO users (email, password_hash, device_jwt_psk) \
             VALUES ($1, $2, $3) RETURNING id::text",
        )
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.device_jwt_psk)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("email already registered: {}", account.email))
            }
            e => StoreError::Db(e),
        })?;
        Ok(id)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<(String, String)>, StoreError> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT id::text, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_authorization(
        &self,
        user_id: &str,
        grant: &AuthorizationGrant,
    ) -> Result<(), StoreError> {
        let Some(id) = user_uuid(user_id) else {
            return Ok(());
        };
        sqlx::query(
            "UPDATE users SET authorization_code = $2, authorization_domain = $3, \
             authorization_date = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(&grant.code)
        .bind(grant.domain())
        .bind(grant.issued_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<(String, AuthorizationGrant)>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
            "SELECT id::text, authorization_domain, authorization_date \
             FROM users \
             WHERE authorization_code = $1 \
               AND authorization_domain IS NOT NULL \
               AND authorization_date IS NOT NULL",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        let Some((user_id, domain, issued_at)) = row else {
            return Ok(None);
        };
        let grant = AuthorizationGrant::from_stored(code.to_string(), &domain, issued_at)
            .ok_or_else(|| StoreError::Corrupt(format!("authorization domain for {user_id}")))?;
        Ok(Some((user_id, grant)))
    }

    async fn finalize_tokens(
        &self,
        user_id: &str,
        code: &str,
        tokens: &TokenPair,
    ) -> Result<bool, StoreError> {
        let Some(id) = user_uuid(user_id) else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE users SET access_token = $3, refresh_token = $4, access_date = now(), \
             report_state = TRUE, authorization_code = NULL, authorization_domain = NULL, \
             authorization_date = NULL \
             WHERE id = $1 AND authorization_code = $2",
        )
        .bind(id)
        .bind(code)
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn rotate_access_token(
        &self,
        user_id: &str,
        refresh_token: &str,
        access_token: &str,
    ) -> Result<bool, StoreError> {
        let Some(id) = user_uuid(user_id) else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE users SET access_token = $3, access_date = now() \
             WHERE id = $1 AND refresh_token = $2",
        )
        .bind(id)
        .bind(refresh_token)
        .bind(access_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn access_token_matches(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<bool, StoreError> {
        let Some(id) = user_uuid(user_id) else {
            return Ok(false);
        };
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND access_token = $2)",
        )
        .bind(id)
        .bind(access_token)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn clear_tokens(&self, user_id: &str) -> Result<(), StoreError> {
        let Some(id) = user_uuid(user_id) else {
            return Ok(());
        };
        sqlx::query(
            "UPDATE users SET report_state = FALSE, access_token = NULL, refresh_token = NULL, \
             access_date = NULL, authorization_code = NULL, authorization_domain = NULL, \
             authorization_date = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn report_state_info(
        &self,
        user_id: &str,
    ) -> Result<Option<ReportStateInfo>, StoreError> {
        let Some(id) = user_uuid(user_id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, (Option<String>, bool)>(
            "SELECT device_jwt_psk, report_state FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(device_jwt_psk, enabled)| ReportStateInfo {
            device_jwt_psk,
            enabled,
        }))
    }
}

#[async_trait]
impl ApplianceStore for PgStore {
    async fn provisioned_devices(
        &self,
        user_id: &str,
    ) -> Result<Option<Vec<ProvisionedDevice>>, StoreError> {
        let Some(id) = user_uuid(user_id) else {
            return Ok(None);
        };
        let doc = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT devices FROM sync_devices WHERE user_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        doc.map(serde_json::from_value::<Vec<ProvisionedDevice>>)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn set_provisioned_devices(
        &self,
        user_id: &str,
        devices: &[ProvisionedDevice],
    ) -> Result<(), StoreError> {
        let id = user_uuid(user_id)
            .ok_or_else(|| StoreError::Corrupt(format!("not a user id: {user_id}")))?;
        sqlx::query(
            "INSERT INTO sync_devices (user_id, devices) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET devices = EXCLUDED.devices",
        )
        .bind(id)
        .bind(serde_json::to_value(devices)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_catalog(&self, user_id: &str, catalog: &Catalog) -> Result<(), StoreError> {
        let id = user_uuid(user_id)
            .ok_or_else(|| StoreError::Corrupt(format!("not a user id: {user_id}")))?;
        sqlx::query(
            "INSERT INTO appliances (user_id, appliances) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE \
             SET appliances = EXCLUDED.appliances, updated_at = now()",
        )
        .bind(id)
        .bind(serde_json::to_value(catalog)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_catalog(&self, user_id: &str) -> Result<Option<Catalog>, StoreError> {
        let Some(id) = user_uuid(user_id) else {
            return Ok(None);
        };
        let doc = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT appliances FROM appliances WHERE user_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        doc.map(serde_json::from_value::<Catalog>)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn update_catalog(
        &self,
        user_id: &str,
        update: &StateUpdate,
    ) -> Result<bool, StoreError> {
        let Some(id) = user_uuid(user_id) else {
            return Ok(false);
        };
        let mut tx = self.pool.begin().await?;

        let doc = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT appliances FROM appliances WHERE user_id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(doc) = doc else {
            return Ok(false);
        };

        let mut catalog: Catalog = serde_json::from_value(doc)?;
        if let Err(rejection) = catalog.apply(update) {
            debug!(user_id, %rejection, "state update rejected");
            return Ok(false);
        }

        sqlx::query("UPDATE appliances SET appliances = $2, updated_at = now() WHERE user_id = $1")
            .bind(id)
            .bind(serde_json::to_value(&catalog)?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_catalog(&self, user_id: &str) -> Result<(), StoreError> {
        let Some(id) = user_uuid(user_id) else {
            return Ok(());
        };
        sqlx::query("DELETE FROM appliances WHERE user_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
