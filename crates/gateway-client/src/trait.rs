//! GatewayClient trait for mocking
//!
//! The reconciler and the resource drivers only see this trait. The
//! kube-backed [`crate::KubeGatewayClient`] implements it for production and
//! `MockGatewayClient` (feature `test-util`) implements it for unit tests.

use crate::error::GatewayError;
use crds::{ApiExposure, Policy, VirtualService};
use k8s_openapi::api::networking::v1::Ingress;

/// Control-plane operations used by the controller
///
/// `get_*` return `Ok(None)` for missing objects. `create_*` fail with
/// [`GatewayError::AlreadyExists`], `update_*` and `delete_*` with
/// [`GatewayError::NotFound`], and writes carrying a stale resourceVersion
/// with [`GatewayError::Conflict`].
#[async_trait::async_trait]
pub trait GatewayClientTrait: Send + Sync {
    // ApiExposure
    async fn get_api_exposure(&self, namespace: &str, name: &str) -> Result<Option<ApiExposure>, GatewayError>;
    /// Persist `exposure.status`, guarded by `exposure`'s resourceVersion.
    async fn update_api_exposure_status(&self, exposure: &ApiExposure) -> Result<ApiExposure, GatewayError>;

    // VirtualService
    async fn get_virtual_service(&self, namespace: &str, name: &str) -> Result<Option<VirtualService>, GatewayError>;
    /// All VirtualServices in every namespace.
    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>, GatewayError>;
    async fn create_virtual_service(&self, virtual_service: &VirtualService) -> Result<VirtualService, GatewayError>;
    async fn update_virtual_service(&self, virtual_service: &VirtualService) -> Result<VirtualService, GatewayError>;
    async fn delete_virtual_service(&self, namespace: &str, name: &str) -> Result<(), GatewayError>;

    // Policy
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<Policy>, GatewayError>;
    async fn create_policy(&self, policy: &Policy) -> Result<Policy, GatewayError>;
    async fn update_policy(&self, policy: &Policy) -> Result<Policy, GatewayError>;
    async fn delete_policy(&self, namespace: &str, name: &str) -> Result<(), GatewayError>;

    // Ingress
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, GatewayError>;
    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, GatewayError>;
    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, GatewayError>;
    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), GatewayError>;
}
