//! Prints the ApiExposure CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/apiexposure.yaml`

use crds::ApiExposure;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&ApiExposure::crd())?);
    Ok(())
}
