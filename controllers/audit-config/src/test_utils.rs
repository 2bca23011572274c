//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use cluster_client::MockClusterClient;
#[cfg(test)]
use crds::{AuditConfig, AuditConfigSpec, OperatorConfig, OperatorConfigSpec};
#[cfg(test)]
use image_resolver::StaticImageResolver;
#[cfg(test)]
use k8s_openapi::api::core::v1::{Node, Pod};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

#[cfg(test)]
use crate::health::Metrics;
#[cfg(test)]
use crate::reconciler::{Progress, Reconciler};
#[cfg(test)]
use crate::resources::{Component, component_labels};

/// Namespace used by the test AuditConfigs
#[cfg(test)]
pub const TEST_NAMESPACE: &str = "security";

/// Name used by the test AuditConfigs
#[cfg(test)]
pub const TEST_NAME: &str = "audit";

/// Helper to create a test AuditConfig with every feature disabled
#[cfg(test)]
pub fn create_test_audit_config(name: &str, namespace: &str) -> AuditConfig {
    AuditConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            ..Default::default()
        },
        spec: AuditConfigSpec::default(),
        status: None,
    }
}

/// Helper to create a test AuditConfig and let `edit` enable features
#[cfg(test)]
pub fn create_test_audit_config_with(edit: impl FnOnce(&mut AuditConfigSpec)) -> AuditConfig {
    let mut config = create_test_audit_config(TEST_NAME, TEST_NAMESPACE);
    edit(&mut config.spec);
    config
}

/// Helper to create a test Node
#[cfg(test)]
pub fn create_test_node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper to create a workload scanner Pod as the Deployment controller would
#[cfg(test)]
pub fn create_test_scanner_pod(config: &str, namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(component_labels(config, Component::Workloads)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper to create the OperatorConfig singleton
#[cfg(test)]
pub fn create_test_operator_config(spec: OperatorConfigSpec) -> OperatorConfig {
    OperatorConfig::new(crds::OPERATOR_CONFIG_DEFAULT_NAME, spec)
}

/// Reconciler over a shared mock cluster
#[cfg(test)]
pub fn create_test_reconciler(
    client: &MockClusterClient,
    images: &StaticImageResolver,
) -> Reconciler<MockClusterClient, StaticImageResolver> {
    let metrics = Arc::new(Metrics::new().unwrap());
    Reconciler::new(client.clone(), images.clone(), crds::OPERATOR_CONFIG_DEFAULT_NAME, metrics)
}

/// Run passes until one converges. Returns the number of passes, panicking
/// when `max_passes` is exceeded.
#[cfg(test)]
pub async fn reconcile_until_converged(
    reconciler: &Reconciler<MockClusterClient, StaticImageResolver>,
    max_passes: usize,
) -> usize {
    for pass in 1..=max_passes {
        let progress = reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap();
        if progress == Progress::Done {
            return pass;
        }
    }
    panic!("AuditConfig did not converge within {max_passes} passes");
}

/// Mark a Deployment as having `ready` of `replicas` pods ready
#[cfg(test)]
pub fn set_deployment_ready(client: &MockClusterClient, name: &str, replicas: i32, ready: i32) {
    client.set_status::<k8s_openapi::api::apps::v1::Deployment>(
        TEST_NAMESPACE,
        name,
        serde_json::json!({ "replicas": replicas, "readyReplicas": ready }),
    );
}
