//! Gateway control-plane client
//!
//! Reads and writes everything the API controller touches on the cluster:
//! the status of `ApiExposure` objects and the `VirtualService`, `Policy`
//! and `Ingress` objects derived from them.
//!
//! # Example
//!
//! ```no_run
//! use gateway_client::{GatewayClientTrait, KubeGatewayClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeGatewayClient::try_default().await?;
//!
//! // Every VirtualService in the cluster, used for hostname occupancy checks
//! let services = client.list_virtual_services().await?;
//!
//! // Missing objects come back as `None`, not as an error
//! let policy = client.get_policy("default", "httpbin").await?;
//! # Ok(())
//! # }
//! ```
//!
//! Enable the `test-util` feature for [`MockGatewayClient`], an in-memory
//! implementation with failure injection and call counters.

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod gateway_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeGatewayClient;
pub use error::GatewayError;
pub use gateway_trait::GatewayClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockGatewayClient, MockOp};
