//! Status aggregation and write-back.
//!
//! A sync reads the object once, records every outcome on an in-memory
//! snapshot and persists the result with a single status write guarded by
//! the snapshot's resourceVersion.

use crate::drivers::ResourceKind;
use crate::error::ControllerError;
use crate::event::ObjectKey;
use crds::{ApiExposure, ApiExposureStatus, GatewayResourceStatus, StatusCode};
use gateway_client::GatewayClientTrait;
use tracing::{debug, warn};

/// Collects status changes for one sync
pub struct StatusAggregator<'a> {
    client: &'a dyn GatewayClientTrait,
    snapshot: ApiExposure,
    original: ApiExposureStatus,
    dirty: bool,
}

impl<'a> StatusAggregator<'a> {
    pub fn new(client: &'a dyn GatewayClientTrait, mut snapshot: ApiExposure) -> Self {
        let original = snapshot.status.clone().unwrap_or_default();
        snapshot.status = Some(original.clone());
        Self {
            client,
            snapshot,
            original,
            dirty: false,
        }
    }

    fn status_mut(&mut self) -> &mut ApiExposureStatus {
        self.snapshot.status.get_or_insert_with(ApiExposureStatus::default)
    }

    /// Current (uncommitted) status
    pub fn status(&self) -> &ApiExposureStatus {
        self.snapshot.status.as_ref().unwrap_or(&self.original)
    }

    /// Mark validation and every listed resource that is not already
    /// applied as in progress
    pub fn mark_in_progress(&mut self, kinds: &[ResourceKind]) {
        self.set_validation(StatusCode::InProgress);
        for kind in kinds {
            if !kind.status_of(self.status()).is_successful() {
                self.set_resource(*kind, GatewayResourceStatus::in_progress());
            }
        }
    }

    /// Put every resource still marked in progress back to what was read,
    /// for syncs that stop before the drivers run
    pub fn clear_in_progress(&mut self, kinds: &[ResourceKind]) {
        for kind in kinds {
            if kind.status_of(self.status()).code() == StatusCode::InProgress {
                let original = kind.status_of(&self.original).clone();
                self.set_resource(*kind, original);
            }
        }
    }

    pub fn set_validation(&mut self, code: StatusCode) {
        if self.status().validation_status != code {
            self.status_mut().validation_status = code;
            self.dirty = true;
        }
    }

    pub fn set_resource(&mut self, kind: ResourceKind, value: GatewayResourceStatus) {
        if kind.status_of(self.status()) != &value {
            *kind.status_of_mut(self.status_mut()) = value;
            self.dirty = true;
        }
    }

    /// Whether the snapshot differs from what was read
    pub fn is_dirty(&self) -> bool {
        self.dirty && self.status() != &self.original
    }

    /// Persist the snapshot's status if anything changed.
    ///
    /// Returns the updated object, or `None` when nothing was written.
    pub async fn commit(self) -> Result<Option<ApiExposure>, ControllerError> {
        let key = ObjectKey::of(&self.snapshot);
        if !self.is_dirty() {
            debug!("Status of {} unchanged, skipping write", key);
            return Ok(None);
        }
        match self.client.update_api_exposure_status(&self.snapshot).await {
            Ok(updated) => {
                debug!("Status of {} committed", key);
                Ok(Some(updated))
            }
            Err(e) if e.is_conflict() => {
                warn!("Status of {} changed during sync, will retry: {}", key, e);
                Err(ControllerError::StatusConflict(key.to_string()))
            }
            Err(e) if e.is_not_found() => {
                debug!("{} was deleted during sync, dropping status", key);
                Ok(None)
            }
            Err(e) => Err(ControllerError::Gateway(e)),
        }
    }
}
