//! OperatorConfig CRD
//!
//! Cluster-scoped singleton carrying process-wide policy. Only the instance
//! named [`OPERATOR_CONFIG_DEFAULT_NAME`] (or the name the controller is
//! configured with) is read; a missing instance means defaults.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Well-known name of the singleton
pub const OPERATOR_CONFIG_DEFAULT_NAME: &str = "audit-operator-config";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "audit.microscaler.io",
    version = "v1alpha1",
    kind = "OperatorConfig"
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfigSpec {
    /// Trust image tags as-is instead of resolving them to digests.
    /// Needed for locally built images that were never pushed.
    #[serde(default)]
    pub skip_container_resolution: bool,

    /// Stop looking for Deployments left behind by releases that named the
    /// workload scanner after the AuditConfig itself.
    #[serde(default)]
    pub disable_legacy_workload_cleanup: bool,
}
