//! Test utilities for unit testing the controller
//!
//! Builders for ApiExposure fixtures and a reconciler wired to the
//! in-memory gateway client.

#[cfg(test)]
use crate::config::{Blacklist, ControllerConfig};
#[cfg(test)]
use crate::drivers::{ResourceDriver, build_drivers};
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crate::validation::{ExposureLister, ListError, ServiceValidator};
#[cfg(test)]
use crds::*;
#[cfg(test)]
use gateway_client::{GatewayClientTrait, MockGatewayClient};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::time::Duration;

/// Helper to create a test ApiExposure without authentication
#[cfg(test)]
pub fn create_test_api_exposure(name: &str, namespace: &str, hostname: &str, service: &str) -> ApiExposure {
    ApiExposure {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{namespace}-{name}")),
            ..Default::default()
        },
        spec: ApiExposureSpec {
            hostname: hostname.to_string(),
            service: ServiceRef {
                name: service.to_string(),
                port: 8080,
            },
            authentication_enabled: None,
            authentication: vec![],
            disable_istio_auth_policy_mtls: None,
        },
        status: None,
    }
}

/// Helper to create a JWT authentication rule
#[cfg(test)]
pub fn jwt_rule(issuer: &str, jwks_uri: &str) -> AuthenticationRule {
    AuthenticationRule {
        rule_type: AuthenticationType::Jwt,
        jwt: JwtRule {
            issuer: issuer.to_string(),
            jwks_uri: jwks_uri.to_string(),
        },
    }
}

/// Helper to create a test ApiExposure with authentication settings
#[cfg(test)]
pub fn create_test_api_exposure_with_auth(
    name: &str,
    namespace: &str,
    service: &str,
    enabled: Option<bool>,
    rules: Vec<AuthenticationRule>,
) -> ApiExposure {
    let mut exposure = create_test_api_exposure(name, namespace, name, service);
    exposure.spec.authentication_enabled = enabled;
    exposure.spec.authentication = rules;
    exposure
}

/// Helper to set a validation status on a fixture
#[cfg(test)]
pub fn with_validation(mut exposure: ApiExposure, code: StatusCode) -> ApiExposure {
    let mut status = exposure.status.unwrap_or_default();
    status.validation_status = code;
    exposure.status = Some(status);
    exposure
}

/// Configuration used by unit tests
#[cfg(test)]
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        domain: "kyma.local".to_string(),
        gateway: "kyma-gateway.kyma-system.svc.cluster.local".to_string(),
        default_issuer: "https://dex.kyma.local".to_string(),
        default_jwks_uri: "http://dex-service.kyma-system.svc.cluster.local:5556/keys".to_string(),
        namespace: None,
        workers: 1,
        max_retries: 2,
        retry_base: Duration::from_millis(10),
        retry_max: Duration::from_millis(50),
        blacklist: Blacklist::parse("default/kubernetes").unwrap(),
        legacy_ingress: false,
        resync_interval: None,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
    }
}

/// Lister backed by the mock client's ApiExposure store
#[cfg(test)]
#[derive(Clone)]
pub struct MockLister {
    pub client: MockGatewayClient,
    pub fail: bool,
}

#[cfg(test)]
impl ExposureLister for MockLister {
    fn list_namespace(&self, namespace: &str) -> Result<Vec<Arc<ApiExposure>>, ListError> {
        if self.fail {
            return Err(ListError("cache unavailable".to_string()));
        }
        Ok(self.client.api_exposures(namespace).into_iter().map(Arc::new).collect())
    }
}

/// Drivers for `config`, all talking to `client`
#[cfg(test)]
pub fn create_test_drivers(client: &MockGatewayClient, config: &ControllerConfig) -> Vec<Box<dyn ResourceDriver>> {
    let shared: Arc<dyn GatewayClientTrait> = Arc::new(client.clone());
    build_drivers(shared, config)
}

/// Reconciler wired to `client` for reads, writes and namespace listing
#[cfg(test)]
pub fn create_test_reconciler(client: &MockGatewayClient, config: &ControllerConfig) -> Reconciler {
    let lister = Arc::new(MockLister {
        client: client.clone(),
        fail: false,
    });
    let validator = ServiceValidator::new(lister, config.blacklist.clone());
    Reconciler::new(
        Arc::new(client.clone()),
        validator,
        create_test_drivers(client, config),
    )
}
