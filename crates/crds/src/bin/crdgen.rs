//! Prints the CRD manifests as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen | kubectl apply -f -`

use crds::{AuditConfig, OperatorConfig};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&AuditConfig::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&OperatorConfig::crd())?);
    Ok(())
}
