//! VirtualService driver
//!
//! Routes `https://<hostname>` on the shared Istio gateway to the backend
//! service. A hostname may be served by only one VirtualService in the
//! whole cluster.

use super::{DerivedKind, DriverError, ResourceDriver, ResourceKind, apply_create, apply_delete, apply_update};
use crate::config::ControllerConfig;
use crds::{
    ApiExposure, Destination, GatewayResource, HttpMatchRequest, HttpRoute, HttpRouteDestination,
    PortSelector, StringMatch, VirtualService, VirtualServiceSpec, owner_labels,
};
use gateway_client::{GatewayClientTrait, GatewayError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Complete `host` with `domain` unless it already ends with it.
pub fn fix_hostname(domain: &str, host: &str) -> String {
    let suffix = format!(".{domain}");
    if host.ends_with(&suffix) {
        host.to_string()
    } else {
        format!("{host}{suffix}")
    }
}

/// In-cluster DNS name of a service
pub fn service_host(service: &str, namespace: &str) -> String {
    format!("{service}.{namespace}.svc.cluster.local")
}

/// Drives the Istio VirtualService of an ApiExposure
pub struct NetworkingDriver {
    client: Arc<dyn GatewayClientTrait>,
    domain: String,
    gateway: String,
}

impl NetworkingDriver {
    pub fn new(client: Arc<dyn GatewayClientTrait>, config: &ControllerConfig) -> Self {
        Self {
            client,
            domain: config.domain.clone(),
            gateway: config.gateway.clone(),
        }
    }

    /// The VirtualService `exposure` asks for
    pub fn desired(&self, exposure: &ApiExposure) -> VirtualService {
        let namespace = exposure.namespace().unwrap_or_default();
        let port = match u32::try_from(exposure.spec.service.port) {
            Ok(port) => Some(port),
            Err(_) => {
                warn!(
                    "ApiExposure {}/{} has invalid port {}, routing without a port",
                    namespace,
                    exposure.name_any(),
                    exposure.spec.service.port
                );
                None
            }
        };
        VirtualService {
            metadata: ObjectMeta {
                name: Some(exposure.name_any()),
                namespace: Some(namespace.clone()),
                labels: Some(owner_labels(exposure)),
                ..Default::default()
            },
            spec: VirtualServiceSpec {
                hosts: vec![fix_hostname(&self.domain, &exposure.spec.hostname)],
                gateways: vec![self.gateway.clone()],
                http: vec![HttpRoute {
                    matches: vec![HttpMatchRequest {
                        uri: Some(StringMatch {
                            regex: Some("/.*".to_string()),
                            ..Default::default()
                        }),
                    }],
                    route: vec![HttpRouteDestination {
                        destination: Destination {
                            host: service_host(&exposure.spec.service.name, &namespace),
                            port: port.map(|number| PortSelector { number }),
                        },
                    }],
                }],
            },
        }
    }

    /// Fail when a VirtualService other than the one derived from
    /// `exposure` already serves `desired`'s host.
    async fn ensure_hostname_free(&self, exposure: &ApiExposure, desired: &VirtualService) -> Result<(), DriverError> {
        let Some(host) = desired.spec.hosts.first() else {
            return Ok(());
        };
        let own_namespace = desired.namespace();
        let own_name = desired.name_any();
        let own_uid = exposure.uid().unwrap_or_default();

        let existing = self.client.list_virtual_services().await?;
        let occupant = existing.iter().find(|vs| {
            let is_ours = (vs.namespace() == own_namespace && vs.name_any() == own_name)
                || crds::is_owned_by(vs.labels(), &own_uid);
            !is_ours && vs.spec.serves_host(host)
        });
        match occupant {
            Some(vs) => {
                debug!(
                    "Host {} requested by {} is served by VirtualService {}/{}",
                    host,
                    exposure.name_any(),
                    vs.namespace().unwrap_or_default(),
                    vs.name_any()
                );
                Err(DriverError::HostnameOccupied(host.clone()))
            }
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl DerivedKind for NetworkingDriver {
    type Object = VirtualService;

    fn kind(&self) -> ResourceKind {
        ResourceKind::VirtualService
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Result<Option<VirtualService>, GatewayError> {
        self.client.get_virtual_service(namespace, name).await
    }

    async fn create_object(&self, object: &VirtualService) -> Result<VirtualService, GatewayError> {
        self.client.create_virtual_service(object).await
    }

    async fn replace_object(&self, object: &VirtualService) -> Result<VirtualService, GatewayError> {
        self.client.update_virtual_service(object).await
    }

    async fn delete_object(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.client.delete_virtual_service(namespace, name).await
    }

    fn same_spec(a: &VirtualService, b: &VirtualService) -> bool {
        a.spec == b.spec
    }
}

#[async_trait::async_trait]
impl ResourceDriver for NetworkingDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VirtualService
    }

    async fn create(&self, desired: &ApiExposure) -> Result<Option<GatewayResource>, DriverError> {
        let virtual_service = self.desired(desired);
        self.ensure_hostname_free(desired, &virtual_service).await?;
        apply_create(self, desired, virtual_service).await.map(Some)
    }

    async fn update(&self, old: &ApiExposure, new: &ApiExposure) -> Result<Option<GatewayResource>, DriverError> {
        let previous = self.desired(old);
        let next = self.desired(new);
        let handle = ResourceKind::VirtualService.recorded_handle(old);
        // Without a recorded handle this update creates the object
        if handle.is_none() || previous.spec.hosts != next.spec.hosts {
            self.ensure_hostname_free(new, &next).await?;
        }
        apply_update(self, new, handle, Some(&previous), next).await.map(Some)
    }

    async fn delete(&self, desired: &ApiExposure) -> Result<(), DriverError> {
        apply_delete(self, desired).await
    }
}
