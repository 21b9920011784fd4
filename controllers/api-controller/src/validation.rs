//! Backend service admission checks.
//!
//! An ApiExposure may only be realised when its backend service is not
//! blacklisted and no other ApiExposure in the same namespace already holds
//! the service.

use crate::config::Blacklist;
use crds::{ApiExposure, StatusCode};
use kube::ResourceExt;
use kube_runtime::reflector::Store;
use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure to read the ApiExposure index
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ListError(pub String);

/// Read-side index of ApiExposure objects
pub trait ExposureLister: Send + Sync {
    /// Every ApiExposure in `namespace`
    fn list_namespace(&self, namespace: &str) -> Result<Vec<Arc<ApiExposure>>, ListError>;
}

/// [`ExposureLister`] over the reflector cache fed by the watcher
#[derive(Clone)]
pub struct StoreLister {
    store: Store<ApiExposure>,
    synced: Arc<AtomicBool>,
}

impl StoreLister {
    pub fn new(store: Store<ApiExposure>) -> Self {
        Self {
            store,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Called once the initial list has landed in the cache
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }
}

impl ExposureLister for StoreLister {
    fn list_namespace(&self, namespace: &str) -> Result<Vec<Arc<ApiExposure>>, ListError> {
        if !self.synced.load(Ordering::SeqCst) {
            return Err(ListError("ApiExposure cache has not synced yet".to_string()));
        }
        Ok(self
            .store
            .state()
            .into_iter()
            .filter(|e| e.namespace().as_deref() == Some(namespace))
            .collect())
    }
}

/// Outcome of [`ServiceValidator::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    /// `Successful`, `TargetServiceOccupied` or `Error`
    pub code: StatusCode,
    /// Why the candidate was rejected
    pub reason: Option<String>,
}

impl Validation {
    fn passed() -> Self {
        Self {
            code: StatusCode::Successful,
            reason: None,
        }
    }

    fn rejected(code: StatusCode, reason: String) -> Self {
        Self {
            code,
            reason: Some(reason),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.code == StatusCode::Successful
    }
}

/// Checks blacklist and service occupancy
pub struct ServiceValidator {
    lister: Arc<dyn ExposureLister>,
    blacklist: Blacklist,
}

impl ServiceValidator {
    pub fn new(lister: Arc<dyn ExposureLister>, blacklist: Blacklist) -> Self {
        Self { lister, blacklist }
    }

    pub fn validate(&self, candidate: &ApiExposure) -> Validation {
        let namespace = candidate.namespace().unwrap_or_default();
        let name = candidate.name_any();
        let service = &candidate.spec.service.name;

        if self.blacklist.contains(&namespace, service) {
            return Validation::rejected(
                StatusCode::Error,
                format!("service {namespace}/{service} is blacklisted and cannot be exposed"),
            );
        }

        let others = match self.lister.list_namespace(&namespace) {
            Ok(others) => others,
            Err(e) => {
                warn!("Cannot list ApiExposures in {}: {}", namespace, e);
                return Validation::rejected(
                    StatusCode::Error,
                    format!("cannot check occupancy of service {namespace}/{service}: {e}"),
                );
            }
        };

        let holder = others
            .iter()
            .filter(|other| other.name_any() != name)
            .filter(|other| &other.spec.service.name == service)
            .find(|other| holds_service(other, candidate));

        match holder {
            Some(holder) => {
                debug!(
                    "Service {}/{} requested by {} is held by {}",
                    namespace,
                    service,
                    name,
                    holder.name_any()
                );
                Validation::rejected(
                    StatusCode::TargetServiceOccupied,
                    format!(
                        "service {namespace}/{service} is already exposed by {}",
                        holder.name_any()
                    ),
                )
            }
            None => Validation::passed(),
        }
    }
}

/// Whether `other` blocks `candidate` from the service they both reference.
///
/// A validated holder always blocks. Objects that were never validated
/// (Empty/InProgress) block only newer candidates, so two objects racing
/// for the same service cannot reject each other. Rejected objects never
/// block.
fn holds_service(other: &ApiExposure, candidate: &ApiExposure) -> bool {
    let code = other
        .status
        .as_ref()
        .map(|s| s.validation_status)
        .unwrap_or_default();
    match code {
        StatusCode::Successful => true,
        StatusCode::Empty | StatusCode::InProgress => {
            age_order(other, candidate) == CmpOrdering::Less
        }
        StatusCode::Error | StatusCode::TargetServiceOccupied | StatusCode::HostnameOccupied => false,
    }
}

fn age_order(a: &ApiExposure, b: &ApiExposure) -> CmpOrdering {
    let created = |e: &ApiExposure| e.metadata.creation_timestamp.clone().map(|t| t.0);
    created(a)
        .cmp(&created(b))
        .then_with(|| a.name_any().cmp(&b.name_any()))
}
