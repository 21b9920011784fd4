//! Legacy Ingress driver
//!
//! Only registered when `ENABLE_LEGACY_INGRESS` is set. Exposes the backend
//! service through a plain Kubernetes Ingress for clusters without Istio
//! routing.

use super::networking::fix_hostname;
use super::{DerivedKind, DriverError, ResourceDriver, ResourceKind, apply_create, apply_delete, apply_update};
use crate::config::ControllerConfig;
use crds::{ApiExposure, GatewayResource, owner_labels};
use gateway_client::{GatewayClientTrait, GatewayError};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::sync::Arc;

/// Drives the legacy Ingress of an ApiExposure
pub struct IngressDriver {
    client: Arc<dyn GatewayClientTrait>,
    domain: String,
}

impl IngressDriver {
    pub fn new(client: Arc<dyn GatewayClientTrait>, config: &ControllerConfig) -> Self {
        Self {
            client,
            domain: config.domain.clone(),
        }
    }

    /// The Ingress `exposure` asks for
    pub fn desired(&self, exposure: &ApiExposure) -> Ingress {
        let backend = IngressBackend {
            service: Some(IngressServiceBackend {
                name: exposure.spec.service.name.clone(),
                port: Some(ServiceBackendPort {
                    number: Some(exposure.spec.service.port),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        Ingress {
            metadata: ObjectMeta {
                name: Some(exposure.name_any()),
                namespace: exposure.namespace(),
                labels: Some(owner_labels(exposure)),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(fix_hostname(&self.domain, &exposure.spec.hostname)),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "Prefix".to_string(),
                            backend,
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl DerivedKind for IngressDriver {
    type Object = Ingress;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Ingress
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, GatewayError> {
        self.client.get_ingress(namespace, name).await
    }

    async fn create_object(&self, object: &Ingress) -> Result<Ingress, GatewayError> {
        self.client.create_ingress(object).await
    }

    async fn replace_object(&self, object: &Ingress) -> Result<Ingress, GatewayError> {
        self.client.update_ingress(object).await
    }

    async fn delete_object(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.client.delete_ingress(namespace, name).await
    }

    fn same_spec(a: &Ingress, b: &Ingress) -> bool {
        a.spec == b.spec
    }
}

#[async_trait::async_trait]
impl ResourceDriver for IngressDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Ingress
    }

    async fn create(&self, desired: &ApiExposure) -> Result<Option<GatewayResource>, DriverError> {
        apply_create(self, desired, self.desired(desired)).await.map(Some)
    }

    async fn update(&self, old: &ApiExposure, new: &ApiExposure) -> Result<Option<GatewayResource>, DriverError> {
        let previous = self.desired(old);
        let handle = ResourceKind::Ingress.recorded_handle(old);
        apply_update(self, new, handle, Some(&previous), self.desired(new)).await.map(Some)
    }

    async fn delete(&self, desired: &ApiExposure) -> Result<(), DriverError> {
        apply_delete(self, desired).await
    }
}
