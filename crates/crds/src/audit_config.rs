//! AuditConfig CRD
//!
//! The user-authored configuration object. Each feature block toggles one
//! family of scanning resources that the controller derives and owns.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// Default cron schedule for per-node scans (top of every hour)
pub const DEFAULT_NODE_SCAN_SCHEDULE: &str = "0 * * * *";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "audit.microscaler.io",
    version = "v1alpha1",
    kind = "AuditConfig",
    namespaced,
    status = "AuditConfigStatus",
    shortname = "auditcfg",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfigSpec {
    /// Secret holding the scanner credentials under the `config` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret_ref: Option<SecretReference>,

    /// Cluster workload scanning (single Deployment)
    #[serde(default)]
    pub workloads: WorkloadsSpec,

    /// Per-node filesystem scanning (one CronJob per node)
    #[serde(default)]
    pub nodes: NodesSpec,

    /// Validating admission webhook
    #[serde(default)]
    pub admission: AdmissionSpec,

    /// In-cluster scan API service
    #[serde(default)]
    pub scan_api: ScanApiSpec,
}

impl AuditConfigSpec {
    /// The admission webhook forwards every review to the scan API, so
    /// enabling admission implies running the scan API as well.
    pub fn scan_api_enabled(&self) -> bool {
        self.scan_api.enable || self.admission.enable
    }
}

/// Reference to a Secret in the same namespace as the AuditConfig
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the Secret
    pub name: String,
}

/// Container image override. Empty fields fall back to operator defaults.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Repository, e.g. `ghcr.io/microscaler/audit-scanner`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Tag, e.g. `1.4.0`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
}

/// Compute resources in Kubernetes quantity notation (`100m`, `128Mi`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    /// Upper bounds, keyed by resource name (`cpu`, `memory`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,

    /// Guaranteed amounts, keyed by resource name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

impl ResourceRequirementsSpec {
    /// True when neither limits nor requests are set
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.requests.is_empty()
    }
}

/// Workload scanner settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadsSpec {
    /// Deploy the workload scanner
    #[serde(default)]
    pub enable: bool,

    /// Scanner image override
    #[serde(default)]
    pub image: ImageSpec,

    /// Scanner container resources
    #[serde(default, skip_serializing_if = "ResourceRequirementsSpec::is_empty")]
    pub resources: ResourceRequirementsSpec,

    /// Service account the scanner runs as (defaults to `audit-operator-k8s-resources-scanning`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

/// Node scanner settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodesSpec {
    /// Create one scan CronJob per cluster node
    #[serde(default)]
    pub enable: bool,

    /// Scanner image override
    #[serde(default)]
    pub image: ImageSpec,

    /// Scanner container resources
    #[serde(default, skip_serializing_if = "ResourceRequirementsSpec::is_empty")]
    pub resources: ResourceRequirementsSpec,

    /// Cron schedule of the node scans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl NodesSpec {
    /// Effective cron schedule
    pub fn schedule(&self) -> &str {
        self.schedule
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_NODE_SCAN_SCHEDULE)
    }
}

/// Admission webhook settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionSpec {
    /// Register the validating webhook
    #[serde(default)]
    pub enable: bool,

    /// Webhook image override (defaults to the operator image)
    #[serde(default)]
    pub image: ImageSpec,

    /// Whether rejected reviews block admission
    #[serde(default)]
    pub mode: AdmissionMode,

    /// Webhook replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

impl AdmissionSpec {
    /// Effective replica count (at least one)
    pub fn replicas(&self) -> i32 {
        self.replicas.filter(|r| *r > 0).unwrap_or(1)
    }
}

/// Admission enforcement mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionMode {
    /// Report but never block (`failurePolicy: Ignore`)
    #[default]
    Permissive,

    /// Block non-compliant objects (`failurePolicy: Fail`)
    Enforcing,
}

/// Scan API settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanApiSpec {
    /// Deploy the scan API service
    #[serde(default)]
    pub enable: bool,

    /// Scan API image override
    #[serde(default)]
    pub image: ImageSpec,

    /// Scan API container resources
    #[serde(default, skip_serializing_if = "ResourceRequirementsSpec::is_empty")]
    pub resources: ResourceRequirementsSpec,
}

/// Observed state, written exclusively by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfigStatus {
    /// One entry per condition type, in insertion order
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Names of the workload scanner pods, sorted
    #[serde(default)]
    pub pods: Vec<String>,
}
