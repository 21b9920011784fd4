//! Resource drivers.
//!
//! Each driver owns one kind of resource derived from an ApiExposure and
//! knows how to create, update and delete it idempotently:
//! - `networking`: Istio VirtualService (routing)
//! - `authentication`: Istio authentication Policy
//! - `ingress`: legacy Kubernetes Ingress
//!
//! The reconciler only sees the [`ResourceDriver`] trait. The shared
//! create/adopt/update/delete algorithm lives in this module and is
//! parameterised per kind by [`DerivedKind`].

pub mod authentication;
pub mod ingress;
pub mod networking;


pub use authentication::AuthenticationDriver;
pub use ingress::IngressDriver;
pub use networking::NetworkingDriver;

use crate::config::ControllerConfig;
use crds::ownership::{CREATED_BY, LABEL_API_NAME, LABEL_API_NAMESPACE, LABEL_CREATED_BY};
use crds::{ApiExposure, ApiExposureStatus, GatewayResource, GatewayResourceStatus};
use gateway_client::{GatewayClientTrait, GatewayError};
use kube::{Resource, ResourceExt};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Derived resource kinds, in the order drivers run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    VirtualService,
    Authentication,
    Ingress,
}

impl ResourceKind {
    /// The status slot this kind reports into
    pub fn status_of(self, status: &ApiExposureStatus) -> &GatewayResourceStatus {
        match self {
            ResourceKind::VirtualService => &status.virtual_service_status,
            ResourceKind::Authentication => &status.authentication_status,
            ResourceKind::Ingress => &status.ingress_status,
        }
    }

    pub fn status_of_mut(self, status: &mut ApiExposureStatus) -> &mut GatewayResourceStatus {
        match self {
            ResourceKind::VirtualService => &mut status.virtual_service_status,
            ResourceKind::Authentication => &mut status.authentication_status,
            ResourceKind::Ingress => &mut status.ingress_status,
        }
    }

    /// Handle recorded for this kind on `exposure`, if any
    pub fn recorded_handle(self, exposure: &ApiExposure) -> Option<&GatewayResource> {
        exposure
            .status
            .as_ref()
            .and_then(|s| self.status_of(s).resource())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::VirtualService => "VirtualService",
            ResourceKind::Authentication => "Policy",
            ResourceKind::Ingress => "Ingress",
        })
    }
}

/// Driver failures
#[derive(Debug, Error)]
pub enum DriverError {
    /// Another VirtualService already serves the hostname
    #[error("hostname {0} is already served by another VirtualService")]
    HostnameOccupied(String),

    /// An object with the derived name exists and belongs to someone else
    #[error("{0} exists and is not managed by this ApiExposure")]
    NotOwned(String),

    /// Control-plane failure
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl DriverError {
    /// Terse text for `lastError`; the full error goes to the log
    pub fn summary(&self) -> String {
        match self {
            DriverError::HostnameOccupied(host) => format!("hostname {host} is occupied"),
            DriverError::NotOwned(what) => format!("{what} is not managed by this ApiExposure"),
            DriverError::Gateway(GatewayError::Conflict(_)) => "concurrent modification".to_string(),
            DriverError::Gateway(GatewayError::NotFound(what)) => format!("{what} not found"),
            DriverError::Gateway(_) => "control plane request failed".to_string(),
        }
    }
}

/// Applies one kind of derived resource
#[async_trait::async_trait]
pub trait ResourceDriver: Send + Sync {
    /// Which status slot this driver reports into
    fn kind(&self) -> ResourceKind;

    /// Create the resource for `desired`.
    ///
    /// `Ok(None)` means the resource is disabled for this exposure.
    async fn create(&self, desired: &ApiExposure) -> Result<Option<GatewayResource>, DriverError>;

    /// Move the resource from `old` (previous spec with current status) to
    /// `new`. Writes nothing when both produce the same shape.
    async fn update(&self, old: &ApiExposure, new: &ApiExposure) -> Result<Option<GatewayResource>, DriverError>;

    /// Remove the resource recorded on `desired`. Missing objects are fine.
    async fn delete(&self, desired: &ApiExposure) -> Result<(), DriverError>;
}

/// Drivers enabled by `config`, in run order
pub fn build_drivers(client: Arc<dyn GatewayClientTrait>, config: &ControllerConfig) -> Vec<Box<dyn ResourceDriver>> {
    let mut drivers: Vec<Box<dyn ResourceDriver>> = vec![
        Box::new(NetworkingDriver::new(client.clone(), config)),
        Box::new(AuthenticationDriver::new(client.clone(), config)),
    ];
    if config.legacy_ingress {
        drivers.push(Box::new(IngressDriver::new(client, config)));
    }
    drivers
}

/// Per-kind plumbing for the shared apply algorithm
#[async_trait::async_trait]
pub(crate) trait DerivedKind: Send + Sync {
    type Object: Resource<DynamicType = ()> + Clone + Send + Sync + 'static;

    fn kind(&self) -> ResourceKind;
    async fn fetch(&self, namespace: &str, name: &str) -> Result<Option<Self::Object>, GatewayError>;
    async fn create_object(&self, object: &Self::Object) -> Result<Self::Object, GatewayError>;
    async fn replace_object(&self, object: &Self::Object) -> Result<Self::Object, GatewayError>;
    async fn delete_object(&self, namespace: &str, name: &str) -> Result<(), GatewayError>;
    /// Spec equality; labels are compared separately
    fn same_spec(a: &Self::Object, b: &Self::Object) -> bool;
}

pub(crate) fn handle_of<K: Resource>(object: &K) -> GatewayResource {
    GatewayResource {
        name: object.name_any(),
        uid: object.uid().unwrap_or_default(),
        version: object.resource_version().unwrap_or_default(),
    }
}

fn same_shape<D: DerivedKind>(a: &D::Object, b: &D::Object) -> bool {
    D::same_spec(a, b) && a.labels() == b.labels()
}

/// Whether `live` was created for `exposure`: same uid, or the same
/// namespace/name if the exposure was deleted and recreated.
fn managed_by<K: Resource>(live: &K, exposure: &ApiExposure) -> bool {
    let labels = live.labels();
    if labels.get(LABEL_CREATED_BY).map(String::as_str) != Some(CREATED_BY) {
        return false;
    }
    if let Some(uid) = exposure.uid() {
        if crds::is_owned_by(labels, &uid) {
            return true;
        }
    }
    labels.get(LABEL_API_NAMESPACE) == exposure.namespace().as_ref()
        && labels.get(LABEL_API_NAME) == Some(&exposure.name_any())
}

/// Carry the live object's identity into `desired` and replace it
async fn replace_from_live<D: DerivedKind>(
    driver: &D,
    live: &D::Object,
    mut desired: D::Object,
) -> Result<GatewayResource, DriverError> {
    desired.meta_mut().resource_version = live.resource_version();
    let replaced = driver.replace_object(&desired).await?;
    Ok(handle_of(&replaced))
}

/// Converge the object under `desired`'s name to `desired`.
///
/// The live object is read first: a missing one is created, a managed one
/// is kept when it already has the desired shape and replaced otherwise.
pub(crate) async fn apply_create<D: DerivedKind>(
    driver: &D,
    exposure: &ApiExposure,
    desired: D::Object,
) -> Result<GatewayResource, DriverError> {
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    if let Some(live) = driver.fetch(&namespace, &name).await? {
        return converge_live(driver, exposure, &live, desired).await;
    }
    match driver.create_object(&desired).await {
        Ok(created) => {
            info!("Created {} {}/{}", driver.kind(), namespace, created.name_any());
            Ok(handle_of(&created))
        }
        Err(e) if e.is_already_exists() => {
            // Created by someone else since the read
            let Some(live) = driver.fetch(&namespace, &name).await? else {
                return Err(DriverError::Gateway(e));
            };
            converge_live(driver, exposure, &live, desired).await
        }
        Err(e) => Err(DriverError::Gateway(e)),
    }
}

/// Adopt `live` for `exposure`, replacing it only when its shape differs
async fn converge_live<D: DerivedKind>(
    driver: &D,
    exposure: &ApiExposure,
    live: &D::Object,
    desired: D::Object,
) -> Result<GatewayResource, DriverError> {
    let namespace = live.namespace().unwrap_or_default();
    let name = live.name_any();
    if !managed_by(live, exposure) {
        return Err(DriverError::NotOwned(format!("{} {}/{}", driver.kind(), namespace, name)));
    }
    if same_shape::<D>(live, &desired) {
        debug!("{} {}/{} already up to date", driver.kind(), namespace, name);
        return Ok(handle_of(live));
    }
    info!("Bringing {} {}/{} up to date", driver.kind(), namespace, name);
    replace_from_live(driver, live, desired).await
}

/// Move from `old_desired` to `new_desired`. `handle` is the object last
/// recorded in status.
pub(crate) async fn apply_update<D: DerivedKind>(
    driver: &D,
    exposure: &ApiExposure,
    handle: Option<&GatewayResource>,
    old_desired: Option<&D::Object>,
    new_desired: D::Object,
) -> Result<GatewayResource, DriverError> {
    let Some(handle) = handle else {
        return apply_create(driver, exposure, new_desired).await;
    };
    if let Some(old) = old_desired {
        if same_shape::<D>(old, &new_desired) {
            debug!("{} {} unchanged", driver.kind(), handle.name);
            return Ok(handle.clone());
        }
    }
    let namespace = new_desired.namespace().unwrap_or_default();
    match driver.fetch(&namespace, &handle.name).await? {
        None => apply_create(driver, exposure, new_desired).await,
        Some(live) => {
            if live.name_any() != new_desired.name_any() {
                // Derived names never change, so this only guards against
                // a hand-edited status
                return apply_create(driver, exposure, new_desired).await;
            }
            let updated = replace_from_live(driver, &live, new_desired).await?;
            info!("Updated {} {}/{}", driver.kind(), namespace, updated.name);
            Ok(updated)
        }
    }
}

/// Delete what `exposure` recorded, or a managed leftover under the
/// derived name.
pub(crate) async fn apply_delete<D: DerivedKind>(
    driver: &D,
    exposure: &ApiExposure,
) -> Result<(), DriverError> {
    let namespace = exposure.namespace().unwrap_or_default();
    let handle = driver.kind().recorded_handle(exposure);
    let name = handle.map_or_else(|| exposure.name_any(), |h| h.name.clone());

    let Some(live) = driver.fetch(&namespace, &name).await? else {
        debug!("{} {}/{} already gone", driver.kind(), namespace, name);
        return Ok(());
    };
    let recorded = handle.is_some_and(|h| live.uid().as_deref() == Some(h.uid.as_str()));
    if !recorded && !managed_by(&live, exposure) {
        debug!("Leaving {} {}/{} alone, not managed by this ApiExposure", driver.kind(), namespace, name);
        return Ok(());
    }
    match driver.delete_object(&namespace, &name).await {
        Ok(()) => {
            info!("Deleted {} {}/{}", driver.kind(), namespace, name);
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(DriverError::Gateway(e)),
    }
}
