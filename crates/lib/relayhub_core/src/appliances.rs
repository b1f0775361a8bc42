//! Device state store: per-user catalog of devices and trait state.
//!
//! SYNC replaces the whole catalog; report-state merges named fields only.
//! A batch that references an unknown device, or a trait the device did not
//! sync with, is rejected whole.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Catalog, FlatStates, ProvisionedDevice, StateUpdate};
use crate::store::{ApplianceStore, StoreError};

/// Device-state errors.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Catalog operations over an [`ApplianceStore`].
pub struct DeviceStateStore {
    store: Arc<dyn ApplianceStore>,
}

impl DeviceStateStore {
    pub fn new(store: Arc<dyn ApplianceStore>) -> Self {
        Self { store }
    }

    /// Devices the provisioning source holds for `user_id`; none means an
    /// empty list.
    pub async fn provisioned_devices(
        &self,
        user_id: &str,
    ) -> Result<Vec<ProvisionedDevice>, StateError> {
        Ok(self
            .store
            .provisioned_devices(user_id)
            .await?
            .unwrap_or_default())
    }

    /// Store the provisioning source's device list for `user_id`.
    pub async fn provision(
        &self,
        user_id: &str,
        devices: &[ProvisionedDevice],
    ) -> Result<(), StateError> {
        if let Some(device) = devices.iter().find(|d| d.id.is_empty()) {
            return Err(StateError::Validation(format!(
                "device without id: {:?}",
                device.attributes
            )));
        }
        self.store.set_provisioned_devices(user_id, devices).await?;
        Ok(())
    }

    /// Rebuild the catalog from `devices` with every trait at its zero value,
    /// replacing whatever was stored before.
    pub async fn sync(
        &self,
        user_id: &str,
        devices: &[ProvisionedDevice],
    ) -> Result<Catalog, StateError> {
        let catalog = Catalog::from_devices(devices);
        self.store.replace_catalog(user_id, &catalog).await?;
        info!(user_id, devices = catalog.len(), "catalog synced");
        Ok(catalog)
    }

    /// Flattened state of each requested device. Ids not in the catalog are
    /// omitted.
    pub async fn query(&self, user_id: &str, device_ids: &[String]) -> Result<FlatStates, StateError> {
        let Some(catalog) = self.store.load_catalog(user_id).await? else {
            debug!(user_id, "query: no catalog");
            return Ok(FlatStates::new());
        };
        Ok(device_ids
            .iter()
            .filter_map(|id| catalog.device(id).map(|d| (id.clone(), d.flattened())))
            .collect())
    }

    /// Merge `update` into the catalog atomically. Returns `false`, applying
    /// nothing, when there is no catalog or any referenced device or trait is
    /// missing.
    pub async fn apply_state_update(
        &self,
        user_id: &str,
        update: &StateUpdate,
    ) -> Result<bool, StateError> {
        let applied = self.store.update_catalog(user_id, update).await?;
        debug!(user_id, applied, "state update");
        Ok(applied)
    }

    /// Remove the user's catalog. Idempotent.
    pub async fn delete_catalog(&self, user_id: &str) -> Result<(), StateError> {
        self.store.delete_catalog(user_id).await?;
        info!(user_id, "catalog deleted");
        Ok(())
    }
}
