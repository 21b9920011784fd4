//! Typed Istio resources written by the controller
//!
//! Only the fields the controller sets are modelled. Unknown fields on live
//! objects are dropped on read, which is fine because the controller owns
//! the whole spec of every object it writes.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Routing rule binding hosts on a gateway to a destination service
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "VirtualService",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    /// Hosts served by this rule
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Gateways the rule is attached to
    #[serde(default)]
    pub gateways: Vec<String>,

    /// HTTP routes
    #[serde(default)]
    pub http: Vec<HttpRoute>,
}

impl VirtualServiceSpec {
    /// Whether the rule serves `host`.
    pub fn serves_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }
}

/// One HTTP route
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// Match conditions
    #[serde(default, rename = "match")]
    pub matches: Vec<HttpMatchRequest>,

    /// Destinations
    #[serde(default)]
    pub route: Vec<HttpRouteDestination>,
}

/// HTTP match condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatchRequest {
    /// URI matcher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<StringMatch>,
}

/// Istio string matcher
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StringMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

/// Weighted destination
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteDestination {
    pub destination: Destination,
}

/// Destination service
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Fully qualified service host
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSelector>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PortSelector {
    pub number: u32,
}

/// Authentication policy for a workload
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[kube(
    group = "authentication.istio.io",
    version = "v1alpha1",
    kind = "Policy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    /// Services the policy applies to
    #[serde(default)]
    pub targets: Vec<TargetSelector>,

    /// Peer authentication methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerAuthenticationMethod>,

    /// Origin (end-user) authentication methods
    #[serde(default)]
    pub origins: Vec<OriginAuthenticationMethod>,

    /// Which identity becomes the request principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_binding: Option<PrincipalBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetSelector {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PeerAuthenticationMethod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtls: Option<MutualTls>,
}

/// Mutual TLS settings; an absent mode means STRICT
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MutualTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MtlsMode>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MtlsMode {
    Strict,
    Permissive,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OriginAuthenticationMethod {
    pub jwt: Jwt,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Jwt {
    pub issuer: String,
    pub jwks_uri: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalBinding {
    UseOrigin,
    UsePeer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_service_wire_format() {
        let spec = VirtualServiceSpec {
            hosts: vec!["httpbin.kyma.local".to_string()],
            gateways: vec!["kyma-gateway".to_string()],
            http: vec![HttpRoute {
                matches: vec![HttpMatchRequest {
                    uri: Some(StringMatch {
                        regex: Some("/.*".to_string()),
                        ..Default::default()
                    }),
                }],
                route: vec![HttpRouteDestination {
                    destination: Destination {
                        host: "httpbin.default.svc.cluster.local".to_string(),
                        port: Some(PortSelector { number: 8000 }),
                    },
                }],
            }],
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["http"][0]["match"][0]["uri"]["regex"], "/.*");
        assert_eq!(value["http"][0]["route"][0]["destination"]["port"]["number"], 8000);
        assert!(spec.serves_host("httpbin.kyma.local"));
    }

    #[test]
    fn test_policy_wire_format() {
        let spec = PolicySpec {
            targets: vec![TargetSelector { name: "httpbin".to_string() }],
            peers: vec![PeerAuthenticationMethod { mtls: Some(MutualTls::default()) }],
            origins: vec![OriginAuthenticationMethod {
                jwt: Jwt {
                    issuer: "https://dex.kyma.local".to_string(),
                    jwks_uri: "http://dex/keys".to_string(),
                },
            }],
            principal_binding: Some(PrincipalBinding::UseOrigin),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["principalBinding"], "USE_ORIGIN");
        assert_eq!(value["peers"][0]["mtls"], serde_json::json!({}));
        assert_eq!(value["origins"][0]["jwt"]["jwksUri"], "http://dex/keys");
    }
}
