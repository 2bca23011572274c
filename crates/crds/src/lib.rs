//! Audit Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions reconciled by the audit operator.

pub mod audit_config;
pub mod condition;
pub mod operator_config;

pub use audit_config::*;
pub use condition::*;
pub use operator_config::*;

/// API group shared by every CRD in this crate
pub const API_GROUP: &str = "audit.microscaler.io";
