//! Controller configuration.
//!
//! All settings come from environment variables and are read once at
//! startup into an immutable [`ControllerConfig`] that is handed to every
//! component that needs it.

use crate::error::ControllerError;
use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_GATEWAY: &str = "kyma-gateway.kyma-system.svc.cluster.local";
const DEFAULT_JWKS_URI: &str = "http://dex-service.kyma-system.svc.cluster.local:5556/keys";
const DEFAULT_BLACKLIST: &str = "default/kubernetes";

/// Backend services that may never be exposed, as (namespace, name) pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blacklist {
    entries: BTreeSet<(String, String)>,
}

impl Blacklist {
    /// Parse a comma-separated list of `namespace/name` entries.
    pub fn parse(raw: &str) -> Result<Self, ControllerError> {
        let mut entries = BTreeSet::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once('/') {
                Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                    entries.insert((namespace.to_string(), name.to_string()));
                }
                _ => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "BLACKLISTED_SERVICES entry '{entry}' is not of the form namespace/name"
                    )));
                }
            }
        }
        Ok(Self { entries })
    }

    /// Whether the service `name` in `namespace` is blacklisted.
    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.entries
            .contains(&(namespace.to_string(), name.to_string()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for Blacklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self
            .entries
            .iter()
            .map(|(ns, name)| format!("{ns}/{name}"))
            .collect();
        write!(f, "{}", joined.join(","))
    }
}

/// Runtime configuration of the API controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Domain appended to bare hostnames
    pub domain: String,
    /// Istio gateway every VirtualService is attached to
    pub gateway: String,
    /// Issuer of the default JWT origin
    pub default_issuer: String,
    /// JWKS URI of the default JWT origin
    pub default_jwks_uri: String,
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Number of worker tasks
    pub workers: usize,
    /// Requeues allowed per item before it is dropped
    pub max_retries: u32,
    /// First retry delay
    pub retry_base: Duration,
    /// Retry delay cap
    pub retry_max: Duration,
    /// Services that may never be exposed
    pub blacklist: Blacklist,
    /// Register the legacy Ingress driver
    pub legacy_ingress: bool,
    /// Period of the resync sweep; `None` disables it
    pub resync_interval: Option<Duration>,
    /// Listen address of the metrics and health check server
    pub metrics_addr: SocketAddr,
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let domain = get("DOMAIN_NAME").ok_or_else(|| {
            ControllerError::InvalidConfig("DOMAIN_NAME environment variable is required".to_string())
        })?;
        let domain = domain.trim().trim_start_matches('.').to_string();

        let gateway = get("GATEWAY").unwrap_or_else(|| DEFAULT_GATEWAY.to_string());
        let default_issuer = get("DEFAULT_ISSUER").unwrap_or_else(|| format!("https://dex.{domain}"));
        let default_jwks_uri = get("DEFAULT_JWKS_URI").unwrap_or_else(|| DEFAULT_JWKS_URI.to_string());
        let namespace = get("WATCH_NAMESPACE");

        let workers: usize = parse_or(&get, "WORKERS", 2)?;
        if workers == 0 {
            return Err(ControllerError::InvalidConfig("WORKERS must be at least 1".to_string()));
        }
        let max_retries: u32 = parse_or(&get, "MAX_RETRIES", 5)?;
        let retry_base_ms: u64 = parse_or(&get, "RETRY_BASE_MS", 500)?;
        let retry_max_ms: u64 = parse_or(&get, "RETRY_MAX_MS", 60_000)?;
        if retry_base_ms == 0 || retry_max_ms < retry_base_ms {
            return Err(ControllerError::InvalidConfig(format!(
                "retry bounds must satisfy 0 < RETRY_BASE_MS ({retry_base_ms}) <= RETRY_MAX_MS ({retry_max_ms})"
            )));
        }

        let blacklist = Blacklist::parse(
            &lookup("BLACKLISTED_SERVICES").unwrap_or_else(|| DEFAULT_BLACKLIST.to_string()),
        )?;
        let legacy_ingress: bool = parse_or(&get, "ENABLE_LEGACY_INGRESS", false)?;
        let resync_secs: u64 = parse_or(&get, "RESYNC_INTERVAL_SECS", 600)?;
        let metrics_addr: SocketAddr = parse_or(&get, "METRICS_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        Ok(Self {
            domain,
            gateway,
            default_issuer,
            default_jwks_uri,
            namespace,
            workers,
            max_retries,
            retry_base: Duration::from_millis(retry_base_ms),
            retry_max: Duration::from_millis(retry_max_ms),
            blacklist,
            legacy_ingress,
            resync_interval: (resync_secs > 0).then(|| Duration::from_secs(resync_secs)),
            metrics_addr,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ControllerError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{key}='{raw}' is invalid: {e}"))
        }),
    }
}
