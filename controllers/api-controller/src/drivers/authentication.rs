//! Authentication Policy driver
//!
//! Requires JWT origin authentication (and by default peer mTLS) on the
//! backend service. The Policy only exists while authentication is enabled
//! on the exposure.

use super::{DerivedKind, DriverError, ResourceDriver, ResourceKind, apply_create, apply_delete, apply_update};
use crate::config::ControllerConfig;
use crds::{
    ApiExposure, AuthenticationType, GatewayResource, Jwt, MutualTls, OriginAuthenticationMethod,
    PeerAuthenticationMethod, Policy, PolicySpec, PrincipalBinding, TargetSelector, owner_labels,
};
use gateway_client::{GatewayClientTrait, GatewayError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

/// Drives the Istio authentication Policy of an ApiExposure
pub struct AuthenticationDriver {
    client: Arc<dyn GatewayClientTrait>,
    default_issuer: String,
    default_jwks_uri: String,
}

impl AuthenticationDriver {
    pub fn new(client: Arc<dyn GatewayClientTrait>, config: &ControllerConfig) -> Self {
        Self {
            client,
            default_issuer: config.default_issuer.clone(),
            default_jwks_uri: config.default_jwks_uri.clone(),
        }
    }

    /// The Policy `exposure` asks for, or `None` when authentication is off
    pub fn desired(&self, exposure: &ApiExposure) -> Option<Policy> {
        if !exposure.spec.authentication_required() {
            return None;
        }

        let mut origins: Vec<OriginAuthenticationMethod> = exposure
            .spec
            .authentication
            .iter()
            .filter(|rule| rule.rule_type == AuthenticationType::Jwt)
            .map(|rule| OriginAuthenticationMethod {
                jwt: Jwt {
                    issuer: rule.jwt.issuer.clone(),
                    jwks_uri: rule.jwt.jwks_uri.clone(),
                },
            })
            .collect();
        if origins.is_empty() {
            origins.push(OriginAuthenticationMethod {
                jwt: Jwt {
                    issuer: self.default_issuer.clone(),
                    jwks_uri: self.default_jwks_uri.clone(),
                },
            });
        }

        let peers = if exposure.spec.peer_mtls_required() {
            vec![PeerAuthenticationMethod {
                mtls: Some(MutualTls::default()),
            }]
        } else {
            Vec::new()
        };

        Some(Policy {
            metadata: ObjectMeta {
                name: Some(exposure.name_any()),
                namespace: exposure.namespace(),
                labels: Some(owner_labels(exposure)),
                ..Default::default()
            },
            spec: PolicySpec {
                targets: vec![TargetSelector {
                    name: exposure.spec.service.name.clone(),
                }],
                peers,
                origins,
                principal_binding: Some(PrincipalBinding::UseOrigin),
            },
        })
    }
}

#[async_trait::async_trait]
impl DerivedKind for AuthenticationDriver {
    type Object = Policy;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Authentication
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Result<Option<Policy>, GatewayError> {
        self.client.get_policy(namespace, name).await
    }

    async fn create_object(&self, object: &Policy) -> Result<Policy, GatewayError> {
        self.client.create_policy(object).await
    }

    async fn replace_object(&self, object: &Policy) -> Result<Policy, GatewayError> {
        self.client.update_policy(object).await
    }

    async fn delete_object(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.client.delete_policy(namespace, name).await
    }

    fn same_spec(a: &Policy, b: &Policy) -> bool {
        a.spec == b.spec
    }
}

#[async_trait::async_trait]
impl ResourceDriver for AuthenticationDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Authentication
    }

    async fn create(&self, desired: &ApiExposure) -> Result<Option<GatewayResource>, DriverError> {
        match self.desired(desired) {
            Some(policy) => apply_create(self, desired, policy).await.map(Some),
            None => {
                // A failed disable may have left the Policy behind
                debug!("Authentication disabled for {}, no Policy", desired.name_any());
                apply_delete(self, desired).await?;
                Ok(None)
            }
        }
    }

    async fn update(&self, old: &ApiExposure, new: &ApiExposure) -> Result<Option<GatewayResource>, DriverError> {
        match (self.desired(old), self.desired(new)) {
            (_, None) => {
                apply_delete(self, old).await?;
                Ok(None)
            }
            (None, Some(policy)) => {
                let handle = ResourceKind::Authentication.recorded_handle(old);
                apply_update(self, new, handle, None, policy).await.map(Some)
            }
            (Some(previous), Some(policy)) => {
                let handle = ResourceKind::Authentication.recorded_handle(old);
                apply_update(self, new, handle, Some(&previous), policy).await.map(Some)
            }
        }
    }

    async fn delete(&self, desired: &ApiExposure) -> Result<(), DriverError> {
        apply_delete(self, desired).await
    }
}
