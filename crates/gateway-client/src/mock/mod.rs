//! Mock GatewayClient for unit testing
//!
//! Stores every kind in memory with the same create/replace/delete semantics
//! as the API server (AlreadyExists, NotFound, resourceVersion conflicts) and
//! a single cluster-wide version counter. Any operation can be made to fail
//! to exercise error paths, and every call is counted so tests can assert
//! that nothing was written.

mod store;

use crate::error::GatewayError;
use crate::gateway_trait::GatewayClientTrait;
use crds::{ApiExposure, Policy, VirtualService};
use k8s_openapi::api::networking::v1::Ingress;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use store::ObjectStore;

/// Operations of [`GatewayClientTrait`], for failure injection and counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    GetApiExposure,
    UpdateApiExposureStatus,
    GetVirtualService,
    ListVirtualServices,
    CreateVirtualService,
    UpdateVirtualService,
    DeleteVirtualService,
    GetPolicy,
    CreatePolicy,
    UpdatePolicy,
    DeletePolicy,
    GetIngress,
    CreateIngress,
    UpdateIngress,
    DeleteIngress,
}

impl MockOp {
    /// True for operations that change cluster state.
    pub fn is_write(self) -> bool {
        !matches!(
            self,
            MockOp::GetApiExposure
                | MockOp::GetVirtualService
                | MockOp::ListVirtualServices
                | MockOp::GetPolicy
                | MockOp::GetIngress
        )
    }
}

/// Remaining injected failures for one operation
#[derive(Debug, Clone, Copy)]
enum Failure {
    Times(usize),
    Always,
}

/// Mock GatewayClient for testing
#[derive(Clone, Debug)]
pub struct MockGatewayClient {
    pub(crate) exposures: Arc<Mutex<ObjectStore<ApiExposure>>>,
    pub(crate) virtual_services: Arc<Mutex<ObjectStore<VirtualService>>>,
    pub(crate) policies: Arc<Mutex<ObjectStore<Policy>>>,
    pub(crate) ingresses: Arc<Mutex<ObjectStore<Ingress>>>,
    failures: Arc<Mutex<HashMap<MockOp, Failure>>>,
    calls: Arc<Mutex<HashMap<MockOp, usize>>>,
    // Cluster-wide resourceVersion counter
    next_version: Arc<Mutex<u64>>,
}

impl Default for MockGatewayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGatewayClient {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self {
            exposures: Arc::new(Mutex::new(ObjectStore::new("ApiExposure"))),
            virtual_services: Arc::new(Mutex::new(ObjectStore::new("VirtualService"))),
            policies: Arc::new(Mutex::new(ObjectStore::new("Policy"))),
            ingresses: Arc::new(Mutex::new(ObjectStore::new("Ingress"))),
            failures: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_version: Arc::new(Mutex::new(1)),
        }
    }

    fn next_version(&self) -> u64 {
        let mut version = self.next_version.lock().unwrap();
        let current = *version;
        *version += 1;
        current
    }

    /// Record the call and return an injected failure if one is armed.
    fn enter(&self, op: MockOp) -> Result<(), GatewayError> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        let mut failures = self.failures.lock().unwrap();
        match failures.get(&op).copied() {
            None => Ok(()),
            Some(Failure::Always) => Err(injected(op)),
            Some(Failure::Times(n)) => {
                if n <= 1 {
                    failures.remove(&op);
                } else {
                    failures.insert(op, Failure::Times(n - 1));
                }
                Err(injected(op))
            }
        }
    }

    /// Make the next `times` calls of `op` fail
    pub fn fail_next(&self, op: MockOp, times: usize) {
        if times > 0 {
            self.failures.lock().unwrap().insert(op, Failure::Times(times));
        }
    }

    /// Make every call of `op` fail until [`MockGatewayClient::clear_failures`]
    pub fn fail_always(&self, op: MockOp) {
        self.failures.lock().unwrap().insert(op, Failure::Always);
    }

    /// Disarm all injected failures
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Number of calls made to `op`
    pub fn call_count(&self, op: MockOp) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// Number of calls to any write operation
    pub fn write_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| op.is_write())
            .map(|(_, n)| n)
            .sum()
    }

    /// Forget all recorded calls
    pub fn reset_counts(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Add an ApiExposure to the mock store (for test setup)
    pub fn add_api_exposure(&self, exposure: ApiExposure) -> ApiExposure {
        let version = self.next_version();
        self.exposures.lock().unwrap().seed(exposure, version)
    }

    /// Remove an ApiExposure from the mock store (for test setup)
    pub fn remove_api_exposure(&self, namespace: &str, name: &str) {
        let _ = self.exposures.lock().unwrap().delete(namespace, name);
    }

    /// Stored ApiExposure, if any
    pub fn api_exposure(&self, namespace: &str, name: &str) -> Option<ApiExposure> {
        self.exposures.lock().unwrap().get(namespace, name)
    }

    /// Stored ApiExposures in `namespace`
    pub fn api_exposures(&self, namespace: &str) -> Vec<ApiExposure> {
        self.exposures
            .lock()
            .unwrap()
            .list()
            .into_iter()
            .filter(|e| e.metadata.namespace.as_deref() == Some(namespace))
            .collect()
    }

    /// Add a VirtualService to the mock store (for test setup)
    pub fn add_virtual_service(&self, virtual_service: VirtualService) -> VirtualService {
        let version = self.next_version();
        self.virtual_services.lock().unwrap().seed(virtual_service, version)
    }

    /// Stored VirtualService, if any
    pub fn virtual_service(&self, namespace: &str, name: &str) -> Option<VirtualService> {
        self.virtual_services.lock().unwrap().get(namespace, name)
    }

    /// Remove a VirtualService behind the controller's back
    pub fn remove_virtual_service(&self, namespace: &str, name: &str) {
        let _ = self.virtual_services.lock().unwrap().delete(namespace, name);
    }

    /// Add a Policy to the mock store (for test setup)
    pub fn add_policy(&self, policy: Policy) -> Policy {
        let version = self.next_version();
        self.policies.lock().unwrap().seed(policy, version)
    }

    /// Stored Policy, if any
    pub fn policy(&self, namespace: &str, name: &str) -> Option<Policy> {
        self.policies.lock().unwrap().get(namespace, name)
    }

    /// Remove a Policy behind the controller's back
    pub fn remove_policy(&self, namespace: &str, name: &str) {
        let _ = self.policies.lock().unwrap().delete(namespace, name);
    }

    /// Add an Ingress to the mock store (for test setup)
    pub fn add_ingress(&self, ingress: Ingress) -> Ingress {
        let version = self.next_version();
        self.ingresses.lock().unwrap().seed(ingress, version)
    }

    /// Stored Ingress, if any
    pub fn ingress(&self, namespace: &str, name: &str) -> Option<Ingress> {
        self.ingresses.lock().unwrap().get(namespace, name)
    }
}

fn injected(op: MockOp) -> GatewayError {
    GatewayError::Api(format!("injected failure for {op:?}"))
}

#[async_trait::async_trait]
impl GatewayClientTrait for MockGatewayClient {
    async fn get_api_exposure(&self, namespace: &str, name: &str) -> Result<Option<ApiExposure>, GatewayError> {
        self.enter(MockOp::GetApiExposure)?;
        Ok(self.api_exposure(namespace, name))
    }

    async fn update_api_exposure_status(&self, exposure: &ApiExposure) -> Result<ApiExposure, GatewayError> {
        self.enter(MockOp::UpdateApiExposureStatus)?;
        let version = self.next_version();
        self.exposures
            .lock()
            .unwrap()
            .update_with(exposure, version, |current, incoming| {
                let mut merged = current.clone();
                merged.status = incoming.status.clone();
                merged
            })
    }

    async fn get_virtual_service(&self, namespace: &str, name: &str) -> Result<Option<VirtualService>, GatewayError> {
        self.enter(MockOp::GetVirtualService)?;
        Ok(self.virtual_service(namespace, name))
    }

    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>, GatewayError> {
        self.enter(MockOp::ListVirtualServices)?;
        Ok(self.virtual_services.lock().unwrap().list())
    }

    async fn create_virtual_service(&self, virtual_service: &VirtualService) -> Result<VirtualService, GatewayError> {
        self.enter(MockOp::CreateVirtualService)?;
        let version = self.next_version();
        self.virtual_services.lock().unwrap().create(virtual_service, version)
    }

    async fn update_virtual_service(&self, virtual_service: &VirtualService) -> Result<VirtualService, GatewayError> {
        self.enter(MockOp::UpdateVirtualService)?;
        let version = self.next_version();
        self.virtual_services.lock().unwrap().replace(virtual_service, version)
    }

    async fn delete_virtual_service(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.enter(MockOp::DeleteVirtualService)?;
        self.virtual_services.lock().unwrap().delete(namespace, name)
    }

    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<Policy>, GatewayError> {
        self.enter(MockOp::GetPolicy)?;
        Ok(self.policy(namespace, name))
    }

    async fn create_policy(&self, policy: &Policy) -> Result<Policy, GatewayError> {
        self.enter(MockOp::CreatePolicy)?;
        let version = self.next_version();
        self.policies.lock().unwrap().create(policy, version)
    }

    async fn update_policy(&self, policy: &Policy) -> Result<Policy, GatewayError> {
        self.enter(MockOp::UpdatePolicy)?;
        let version = self.next_version();
        self.policies.lock().unwrap().replace(policy, version)
    }

    async fn delete_policy(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.enter(MockOp::DeletePolicy)?;
        self.policies.lock().unwrap().delete(namespace, name)
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, GatewayError> {
        self.enter(MockOp::GetIngress)?;
        Ok(self.ingress(namespace, name))
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, GatewayError> {
        self.enter(MockOp::CreateIngress)?;
        let version = self.next_version();
        self.ingresses.lock().unwrap().create(ingress, version)
    }

    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, GatewayError> {
        self.enter(MockOp::UpdateIngress)?;
        let version = self.next_version();
        self.ingresses.lock().unwrap().replace(ingress, version)
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.enter(MockOp::DeleteIngress)?;
        self.ingresses.lock().unwrap().delete(namespace, name)
    }
}
