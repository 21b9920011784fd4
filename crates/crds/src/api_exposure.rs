//! ApiExposure CRD
//!
//! Declares that a backend service should be reachable under a hostname,
//! optionally protected by JWT authentication. The controller derives a
//! VirtualService, an authentication Policy and (legacy) an Ingress from it
//! and reports the outcome of each on the status subresource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.kyma-project.io",
    version = "v1alpha2",
    kind = "ApiExposure",
    shortname = "apiexp",
    namespaced,
    status = "ApiExposureStatus",
    printcolumn = r#"{"name":"Hostname","type":"string","jsonPath":".spec.hostname"}"#,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.service.name"}"#,
    printcolumn = r#"{"name":"Validation","type":"string","jsonPath":".status.validationStatus"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApiExposureSpec {
    /// Hostname under which the service is exposed. A bare name is
    /// completed with the controller's domain.
    pub hostname: String,

    /// Backend service receiving the traffic
    pub service: ServiceRef,

    /// Explicit authentication switch. When absent, authentication is
    /// enabled exactly when at least one rule is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_enabled: Option<bool>,

    /// JWT rules for the authentication policy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authentication: Vec<AuthenticationRule>,

    /// Drop the peer mTLS requirement from the generated policy
    #[serde(
        default,
        rename = "disableIstioAuthPolicyMTLS",
        skip_serializing_if = "Option::is_none"
    )]
    pub disable_istio_auth_policy_mtls: Option<bool>,
}

impl ApiExposureSpec {
    /// Whether an authentication policy should exist for this exposure.
    pub fn authentication_required(&self) -> bool {
        match self.authentication_enabled {
            Some(enabled) => enabled,
            None => !self.authentication.is_empty(),
        }
    }

    /// Whether the generated policy should require peer mTLS.
    pub fn peer_mtls_required(&self) -> bool {
        !self.disable_istio_auth_policy_mtls.unwrap_or(false)
    }
}

/// Reference to the backend service in the exposure's namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRef {
    /// Service name
    pub name: String,

    /// Service port
    pub port: i32,
}

/// One authentication rule
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRule {
    /// Rule type; only JWT is supported
    #[serde(rename = "type", default)]
    pub rule_type: AuthenticationType,

    /// JWT settings
    pub jwt: JwtRule,
}

/// Supported authentication rule types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum AuthenticationType {
    /// JSON Web Token
    #[default]
    #[serde(rename = "JWT")]
    Jwt,
}

/// JWT issuer and key set location
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwtRule {
    /// Expected `iss` claim
    pub issuer: String,

    /// URI of the JSON Web Key Set used to verify signatures
    pub jwks_uri: String,
}

/// Status reported by the controller
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiExposureStatus {
    /// Outcome of the occupancy/blacklist validation
    #[serde(default)]
    pub validation_status: StatusCode,

    /// Outcome of the authentication policy
    #[serde(default)]
    pub authentication_status: GatewayResourceStatus,

    /// Outcome of the routing rule
    #[serde(default)]
    pub virtual_service_status: GatewayResourceStatus,

    /// Outcome of the legacy ingress rule
    #[serde(default, skip_serializing_if = "GatewayResourceStatus::is_empty")]
    pub ingress_status: GatewayResourceStatus,
}

impl ApiExposureStatus {
    /// True when the controller has never written anything.
    pub fn is_empty(&self) -> bool {
        self.validation_status == StatusCode::Empty
            && self.authentication_status.is_empty()
            && self.virtual_service_status.is_empty()
            && self.ingress_status.is_empty()
    }

    /// True when a later sync could still change the outcome without a spec
    /// change: something failed, or a sync was interrupted mid-way.
    pub fn is_unsettled(&self) -> bool {
        let validation_unsettled = matches!(
            self.validation_status,
            StatusCode::Empty
                | StatusCode::InProgress
                | StatusCode::Error
                | StatusCode::TargetServiceOccupied
        );
        validation_unsettled
            || [
                &self.authentication_status,
                &self.virtual_service_status,
                &self.ingress_status,
            ]
            .iter()
            .any(|s| matches!(s.code(), StatusCode::InProgress | StatusCode::Error))
    }
}

/// Status codes shared by validation and every derived resource
///
/// Serializes as PascalCase ("Successful", "HostnameOccupied", ...).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum StatusCode {
    /// Nothing recorded yet
    #[default]
    Empty,

    /// A sync is running
    InProgress,

    /// Applied
    Successful,

    /// Failed; see `lastError`
    Error,

    /// Another VirtualService already serves the hostname
    HostnameOccupied,

    /// Another ApiExposure already claims the backend service
    TargetServiceOccupied,
}

impl StatusCode {
    /// Validation codes that mean "this exposure does not own its service".
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            StatusCode::Error | StatusCode::TargetServiceOccupied | StatusCode::HostnameOccupied
        )
    }
}

/// Identity of a derived resource as last written by the controller
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResource {
    /// Object name
    pub name: String,

    /// Object uid
    pub uid: String,

    /// resourceVersion observed right after the write
    pub version: String,
}

/// Per-resource outcome
///
/// `resource` is only present for `Successful`, `lastError` only for `Error`.
/// The constructors are the only way to build one in code.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResourceStatus {
    #[serde(default)]
    code: StatusCode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource: Option<GatewayResource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl GatewayResourceStatus {
    /// Nothing recorded (also used for "disabled").
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sync started but not finished.
    pub fn in_progress() -> Self {
        Self::with_code(StatusCode::InProgress)
    }

    /// Resource applied and identified by `resource`.
    pub fn successful(resource: GatewayResource) -> Self {
        Self {
            code: StatusCode::Successful,
            resource: Some(resource),
            last_error: None,
        }
    }

    /// Resource could not be applied.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Error,
            resource: None,
            last_error: Some(message.into()),
        }
    }

    /// Hostname is already served by a foreign VirtualService.
    pub fn hostname_occupied() -> Self {
        Self::with_code(StatusCode::HostnameOccupied)
    }

    fn with_code(code: StatusCode) -> Self {
        Self {
            code,
            resource: None,
            last_error: None,
        }
    }

    /// Recorded code
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// Handle of the applied resource, if any
    pub fn resource(&self) -> Option<&GatewayResource> {
        self.resource.as_ref()
    }

    /// Last error message, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True for `Empty`
    pub fn is_empty(&self) -> bool {
        self.code == StatusCode::Empty
    }

    /// True for `Successful` with a recorded handle
    pub fn is_successful(&self) -> bool {
        self.code == StatusCode::Successful && self.resource.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(enabled: Option<bool>, rules: usize) -> ApiExposureSpec {
        ApiExposureSpec {
            hostname: "httpbin".to_string(),
            service: ServiceRef {
                name: "httpbin".to_string(),
                port: 8000,
            },
            authentication_enabled: enabled,
            authentication: (0..rules)
                .map(|i| AuthenticationRule {
                    rule_type: AuthenticationType::Jwt,
                    jwt: JwtRule {
                        issuer: format!("https://issuer-{i}"),
                        jwks_uri: format!("https://issuer-{i}/keys"),
                    },
                })
                .collect(),
            disable_istio_auth_policy_mtls: None,
        }
    }

    #[test]
    fn test_authentication_required() {
        assert!(!spec(None, 0).authentication_required());
        assert!(spec(None, 1).authentication_required());
        assert!(spec(Some(true), 0).authentication_required());
        assert!(!spec(Some(false), 2).authentication_required());
    }

    #[test]
    fn test_status_code_serializes_pascal_case() {
        let json = serde_json::to_string(&StatusCode::TargetServiceOccupied).unwrap();
        assert_eq!(json, "\"TargetServiceOccupied\"");
    }

    #[test]
    fn test_resource_status_constructors_keep_invariants() {
        let ok = GatewayResourceStatus::successful(GatewayResource {
            name: "httpbin".to_string(),
            uid: "uid-1".to_string(),
            version: "7".to_string(),
        });
        assert!(ok.is_successful());
        assert!(ok.last_error().is_none());

        let failed = GatewayResourceStatus::error("boom");
        assert_eq!(failed.code(), StatusCode::Error);
        assert!(failed.resource().is_none());
        assert_eq!(failed.last_error(), Some("boom"));

        let occupied = GatewayResourceStatus::hostname_occupied();
        assert!(occupied.resource().is_none());
        assert!(occupied.last_error().is_none());
    }

    #[test]
    fn test_status_wire_format() {
        let status = ApiExposureStatus {
            validation_status: StatusCode::Successful,
            virtual_service_status: GatewayResourceStatus::successful(GatewayResource {
                name: "httpbin".to_string(),
                uid: "uid-1".to_string(),
                version: "7".to_string(),
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["validationStatus"], "Successful");
        assert_eq!(value["virtualServiceStatus"]["resource"]["uid"], "uid-1");
        assert_eq!(value["authenticationStatus"]["code"], "Empty");
        assert!(value.get("ingressStatus").is_none());
    }

    #[test]
    fn test_unsettled() {
        let mut status = ApiExposureStatus::default();
        assert!(status.is_empty());
        assert!(status.is_unsettled());

        status.validation_status = StatusCode::Successful;
        assert!(!status.is_unsettled());

        status.authentication_status = GatewayResourceStatus::error("x");
        assert!(status.is_unsettled());

        status.authentication_status = GatewayResourceStatus::empty();
        status.validation_status = StatusCode::HostnameOccupied;
        assert!(!status.is_unsettled());
    }

    #[test]
    fn test_spec_parses_original_field_names() {
        let spec: ApiExposureSpec = serde_json::from_value(serde_json::json!({
            "hostname": "foo",
            "service": {"name": "foo", "port": 80},
            "authentication": [{"type": "JWT", "jwt": {"issuer": "i", "jwksUri": "j"}}],
            "disableIstioAuthPolicyMTLS": true
        }))
        .unwrap();
        assert_eq!(spec.authentication[0].jwt.jwks_uri, "j");
        assert!(!spec.peer_mtls_required());
    }
}
