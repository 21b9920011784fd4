//! API gateway CRD definitions
//!
//! The `ApiExposure` custom resource and typed shapes of the Istio resources
//! the controller derives from it.

pub mod api_exposure;
pub mod istio;
pub mod ownership;

pub use api_exposure::*;
pub use istio::*;
pub use ownership::{is_owned_by, owner_labels};
