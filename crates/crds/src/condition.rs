//! Status conditions
//!
//! Conditions record the health of one feature area over time. A condition
//! with status `True` means the feature is degraded.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Feature area a condition reports on. At most one condition per type
/// appears in a status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// Cluster workload scanner health
    WorkloadScanningDegraded,
    /// Per-node scan CronJob health
    NodeScanningDegraded,
    /// Admission webhook health
    AdmissionDegraded,
    /// Scan API health
    ScanApiDegraded,
}

impl ConditionType {
    /// Wire name of the condition type
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkloadScanningDegraded => "WorkloadScanningDegraded",
            Self::NodeScanningDegraded => "NodeScanningDegraded",
            Self::AdmissionDegraded => "AdmissionDegraded",
            Self::ScanApiDegraded => "ScanApiDegraded",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

/// A single typed status entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (unique within a status)
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Machine-readable CamelCase reason
    #[serde(default)]
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    /// Last time any field of this condition changed
    pub last_update_time: DateTime<Utc>,

    /// Last time `status` changed
    pub last_transition_time: DateTime<Utc>,
}

/// Finds the condition of the given type, if present.
pub fn find_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}
