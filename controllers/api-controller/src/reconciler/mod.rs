//! Reconciliation logic for ApiExposure objects.
//!
//! One call to [`Reconciler::sync`] handles one [`SyncEvent`]:
//! - Create: validate, then run every driver's create
//! - Update: validate, then move every derived resource from the old spec
//!   to the current one
//! - Delete: remove every derived resource
//!
//! The object is always re-read before acting so a stale event never acts
//! on outdated state. Status is written at most once per sync.

use crate::drivers::{DriverError, ResourceDriver, ResourceKind};
use crate::error::ControllerError;
use crate::event::{ObjectKey, SyncEvent};
use crate::status::StatusAggregator;
use crate::validation::ServiceValidator;
use crds::{ApiExposure, GatewayResource, GatewayResourceStatus};
use gateway_client::GatewayClientTrait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reconciles ApiExposure objects into their derived resources.
pub struct Reconciler {
    client: Arc<dyn GatewayClientTrait>,
    validator: ServiceValidator,
    drivers: Vec<Box<dyn ResourceDriver>>,
}

impl Reconciler {
    /// Creates a new reconciler. Drivers run in the order given.
    pub fn new(
        client: Arc<dyn GatewayClientTrait>,
        validator: ServiceValidator,
        drivers: Vec<Box<dyn ResourceDriver>>,
    ) -> Self {
        Self {
            client,
            validator,
            drivers,
        }
    }

    /// Status slots this reconciler writes
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.drivers.iter().map(|d| d.kind()).collect()
    }

    /// Handle one event.
    ///
    /// Returns an error when the event should be retried.
    pub async fn sync(&self, event: &SyncEvent) -> Result<(), ControllerError> {
        match event {
            SyncEvent::Create { object } => self.on_create(object).await,
            SyncEvent::Update { old, new } => self.on_update(old, new).await,
            SyncEvent::Delete { object } => self.on_delete(object).await,
        }
    }

    /// Current state of `object`, or `None` if it is gone
    async fn refetch(&self, object: &ApiExposure) -> Result<Option<ApiExposure>, ControllerError> {
        let key = ObjectKey::of(object);
        let current = self.client.get_api_exposure(&key.namespace, &key.name).await?;
        if current.is_none() {
            debug!("ApiExposure {} no longer exists, nothing to do", key);
        }
        Ok(current)
    }

    /// Run validation and record a rejection. Returns false when the
    /// drivers must not run.
    fn admit(&self, aggregator: &mut StatusAggregator<'_>, current: &ApiExposure) -> bool {
        let validation = self.validator.validate(current);
        aggregator.set_validation(validation.code);
        if validation.is_successful() {
            return true;
        }
        aggregator.clear_in_progress(&self.kinds());
        info!(
            "ApiExposure {} rejected ({:?}): {}",
            ObjectKey::of(current),
            validation.code,
            validation.reason.as_deref().unwrap_or("no reason given")
        );
        false
    }

    async fn on_create(&self, object: &ApiExposure) -> Result<(), ControllerError> {
        let Some(current) = self.refetch(object).await? else {
            return Ok(());
        };
        let key = ObjectKey::of(&current);
        info!("Syncing created ApiExposure {} (version {})", key, current.resource_version().unwrap_or_default());

        let mut aggregator = StatusAggregator::new(self.client.as_ref(), current.clone());
        if aggregator.status().is_empty() {
            aggregator.mark_in_progress(&self.kinds());
        }
        if !self.admit(&mut aggregator, &current) {
            aggregator.commit().await?;
            return Ok(());
        }

        let mut failures = Vec::new();
        for driver in &self.drivers {
            let kind = driver.kind();
            let outcome = driver.create(&current).await;
            record(&mut aggregator, &key, kind, outcome, &mut failures);
        }

        aggregator.commit().await?;
        finish(key, failures)
    }

    async fn on_update(&self, old: &ApiExposure, _new: &ApiExposure) -> Result<(), ControllerError> {
        let Some(current) = self.refetch(old).await? else {
            return Ok(());
        };
        let key = ObjectKey::of(&current);

        let same_object = old.uid() == current.uid();
        if same_object && old.resource_version() == current.resource_version() {
            debug!("ApiExposure {} unchanged since last sync", key);
            return Ok(());
        }
        if same_object && old.spec == current.spec {
            debug!("ApiExposure {} spec unchanged, only status or metadata moved", key);
            return Ok(());
        }
        info!("Syncing updated ApiExposure {} (version {})", key, current.resource_version().unwrap_or_default());

        // Previous spec with the currently recorded handles
        let old_view = ApiExposure {
            metadata: current.metadata.clone(),
            spec: old.spec.clone(),
            status: current.status.clone(),
        };

        let mut aggregator = StatusAggregator::new(self.client.as_ref(), current.clone());
        aggregator.mark_in_progress(&self.kinds());
        if !self.admit(&mut aggregator, &current) {
            aggregator.commit().await?;
            return Ok(());
        }

        let mut failures = Vec::new();
        for driver in &self.drivers {
            let outcome = driver.update(&old_view, &current).await;
            record(&mut aggregator, &key, driver.kind(), outcome, &mut failures);
        }

        aggregator.commit().await?;
        finish(key, failures)
    }

    async fn on_delete(&self, object: &ApiExposure) -> Result<(), ControllerError> {
        let key = ObjectKey::of(object);
        info!("Removing resources of deleted ApiExposure {}", key);

        let mut failures = Vec::new();
        for driver in &self.drivers {
            if let Err(e) = driver.delete(object).await {
                let message = correlated(&key, driver.kind(), &e);
                failures.push(message);
            }
        }
        finish(key, failures)
    }
}

/// Write one driver outcome into the aggregator
fn record(
    aggregator: &mut StatusAggregator<'_>,
    key: &ObjectKey,
    kind: ResourceKind,
    outcome: Result<Option<GatewayResource>, DriverError>,
    failures: &mut Vec<String>,
) {
    match outcome {
        Ok(Some(handle)) => aggregator.set_resource(kind, GatewayResourceStatus::successful(handle)),
        Ok(None) => aggregator.set_resource(kind, GatewayResourceStatus::empty()),
        Err(DriverError::HostnameOccupied(host)) => {
            warn!("{} for {} not applied: hostname {} is occupied", kind, key, host);
            aggregator.set_resource(kind, GatewayResourceStatus::hostname_occupied());
        }
        Err(e) => {
            let message = correlated(key, kind, &e);
            aggregator.set_resource(kind, GatewayResourceStatus::error(message.clone()));
            failures.push(message);
        }
    }
}

/// Log the full error under a fresh correlation id and return the short
/// message that goes to status.
fn correlated(key: &ObjectKey, kind: ResourceKind, err: &DriverError) -> String {
    let id = Uuid::new_v4();
    error!("{} for {} failed (correlation id: {}): {}", kind, key, id, err);
    format!("{} (correlation id: {})", err.summary(), id)
}

fn finish(key: ObjectKey, failures: Vec<String>) -> Result<(), ControllerError> {
    if failures.is_empty() {
        debug!("Sync of {} finished", key);
        return Ok(());
    }
    Err(ControllerError::Sync {
        key: key.to_string(),
        reasons: failures.join("; "),
    })
}

#[cfg(test)]
mod reconciler_test;
