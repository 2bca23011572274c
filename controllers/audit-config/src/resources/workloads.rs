//! Workload scanner objects: inventory ConfigMap and a single Deployment

use std::collections::BTreeMap;

use crds::AuditConfig;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, EnvVar, ExecAction, HostPathVolumeSource, PodSpec, PodTemplateSpec, Probe, Toleration,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use super::{
    CONFIG_MOUNT_PATH, Component, HOST_MOUNT_PATH, INVENTORY_KEY, Owner, component_labels, names,
    resource_requirements, scanner_config_volume,
};

/// Service account used when the AuditConfig does not name one
pub const DEFAULT_SERVICE_ACCOUNT: &str = "audit-operator-k8s-resources-scanning";
/// Pod template annotation that triggers a rolling restart when changed
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";
/// Pod template annotation recording which inventory the pods were started with
pub const INVENTORY_REVISION_ANNOTATION: &str = "audit.microscaler.io/inventory-revision";

const CONTAINER_NAME: &str = "audit-scanner";
const SCANNER_CONFIG: &str = "/etc/opt/audit/config.yml";
const SCANNER_INVENTORY: &str = "/etc/opt/audit/inventory.yml";

/// Short stable digest of an inventory document
pub fn inventory_revision(inventory: &str) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, inventory.as_bytes())
        .simple()
        .to_string()
}

/// Inventory ConfigMap
pub fn config_map(owner: &Owner, inventory: &str) -> ConfigMap {
    ConfigMap {
        metadata: owner.child_meta(names::workload_config_map(&owner.name), Component::Workloads),
        data: Some(BTreeMap::from([(INVENTORY_KEY.to_string(), inventory.to_string())])),
        ..Default::default()
    }
}

/// Scanner Deployment
pub fn deployment(config: &AuditConfig, owner: &Owner, image: &str, inventory: &str) -> Deployment {
    let labels = component_labels(&owner.name, Component::Workloads);
    let spec = &config.spec.workloads;
    let service_account = spec
        .service_account_name
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string());
    let credentials = config.spec.credentials_secret_ref.as_ref().map(|r| r.name.as_str());

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["audit-scanner".to_string()]),
        args: Some(
            ["serve", "--config", SCANNER_CONFIG, "--inventory-file", SCANNER_INVENTORY]
                .map(String::from)
                .to_vec(),
        ),
        resources: Some(resource_requirements(&spec.resources)),
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(["audit-scanner", "status", "--config", SCANNER_CONFIG].map(String::from).to_vec()),
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(300),
            timeout_seconds: Some(5),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "root".to_string(),
                mount_path: HOST_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "config".to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        env: Some(vec![env("DEBUG", "false"), env("PROCFS", "on")]),
        ..Default::default()
    };

    Deployment {
        metadata: owner.child_meta(names::workload_deployment(&owner.name), Component::Workloads),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([(
                        INVENTORY_REVISION_ANNOTATION.to_string(),
                        inventory_revision(inventory),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(service_account),
                    tolerations: Some(vec![Toleration {
                        key: Some("node-role.kubernetes.io/master".to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Default::default()
                    }]),
                    containers: vec![container],
                    volumes: Some(vec![
                        Volume {
                            name: "root".to_string(),
                            host_path: Some(HostPathVolumeSource {
                                path: "/".to_string(),
                                type_: Some(String::new()),
                            }),
                            ..Default::default()
                        },
                        scanner_config_volume(&names::workload_config_map(&owner.name), credentials),
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Inventory revision the live pods were started with
pub fn pod_inventory_revision(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(INVENTORY_REVISION_ANNOTATION)
        .map(String::as_str)
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{AuditConfigSpec, SecretReference};

    fn audit_config() -> AuditConfig {
        let mut config = AuditConfig::new("audit", AuditConfigSpec::default());
        config.metadata.namespace = Some("security".to_string());
        config.metadata.uid = Some("uid-1".to_string());
        config
    }

    fn pod(d: &Deployment) -> &PodSpec {
        d.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    #[test]
    fn test_deployment_defaults() {
        let config = audit_config();
        let owner = Owner::of(&config).unwrap();
        let d = deployment(&config, &owner, "scanner@sha256:abc", "inv");

        assert_eq!(d.metadata.name.as_deref(), Some("audit-workload"));
        assert_eq!(pod(&d).service_account_name.as_deref(), Some(DEFAULT_SERVICE_ACCOUNT));
        assert_eq!(pod(&d).containers[0].image.as_deref(), Some("scanner@sha256:abc"));
        assert_eq!(pod_inventory_revision(&d), Some(inventory_revision("inv").as_str()));

        let sources = pod(&d).volumes.as_ref().unwrap()[1]
            .projected
            .as_ref()
            .unwrap()
            .sources
            .as_ref()
            .unwrap()
            .len();
        assert_eq!(sources, 1, "no credentials projection without a secret ref");
    }

    #[test]
    fn test_deployment_with_credentials_and_service_account() {
        let mut config = audit_config();
        config.spec.credentials_secret_ref = Some(SecretReference {
            name: "creds".to_string(),
        });
        config.spec.workloads.service_account_name = Some("scanner".to_string());
        let owner = Owner::of(&config).unwrap();
        let d = deployment(&config, &owner, "img", "inv");

        assert_eq!(pod(&d).service_account_name.as_deref(), Some("scanner"));
        let projected = pod(&d).volumes.as_ref().unwrap()[1].projected.clone().unwrap();
        let secret = projected.sources.unwrap()[1].secret.clone().unwrap();
        assert_eq!(secret.name, "creds");
    }

    #[test]
    fn test_inventory_revision_tracks_content() {
        assert_eq!(inventory_revision("a"), inventory_revision("a"));
        assert_ne!(inventory_revision("a"), inventory_revision("b"));
    }

    #[test]
    fn test_config_map_carries_inventory() {
        let owner = Owner::of(&audit_config()).unwrap();
        let cm = config_map(&owner, "kind: Inventory");
        assert_eq!(cm.metadata.name.as_deref(), Some("audit-deploy"));
        assert_eq!(cm.data.unwrap()[INVENTORY_KEY], "kind: Inventory");
    }
}
