//! Node scanner objects: inventory ConfigMap and one CronJob per node

use std::collections::BTreeMap;

use crds::AuditConfig;
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, EnvVar, HostPathVolumeSource, PodSpec, PodTemplateSpec, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{
    CONFIG_MOUNT_PATH, Component, HOST_MOUNT_PATH, INVENTORY_KEY, Owner, component_labels, names,
    resource_requirements, scanner_config_volume,
};

const CONTAINER_NAME: &str = "audit-node-scanner";

/// Inventory ConfigMap shared by all node CronJobs
pub fn config_map(owner: &Owner, inventory: &str) -> ConfigMap {
    ConfigMap {
        metadata: owner.child_meta(names::node_config_map(&owner.name), Component::Nodes),
        data: Some(BTreeMap::from([(INVENTORY_KEY.to_string(), inventory.to_string())])),
        ..Default::default()
    }
}

/// CronJob scanning the filesystem of `node`
pub fn cron_job(config: &AuditConfig, owner: &Owner, image: &str, node: &str) -> CronJob {
    let labels = component_labels(&owner.name, Component::Nodes);
    let spec = &config.spec.nodes;
    let credentials = config.spec.credentials_secret_ref.as_ref().map(|r| r.name.as_str());

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["audit-scanner".to_string()]),
        args: Some(
            [
                "scan",
                "local",
                "--config",
                "/etc/opt/audit/config.yml",
                "--inventory-file",
                "/etc/opt/audit/inventory.yml",
                "--score-threshold",
                "0",
            ]
            .map(String::from)
            .to_vec(),
        ),
        resources: Some(resource_requirements(&spec.resources)),
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
        env: Some(vec![
            EnvVar {
                name: "DEBUG".to_string(),
                value: Some("false".to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "PROCFS".to_string(),
                value: Some("on".to_string()),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    CronJob {
        metadata: owner.child_meta(names::node_cron_job(&owner.name, node), Component::Nodes),
        spec: Some(CronJobSpec {
            schedule: spec.schedule().to_string(),
            concurrency_policy: Some("Forbid".to_string()),
            successful_jobs_history_limit: Some(1),
            failed_jobs_history_limit: Some(1),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            node_name: Some(node.to_string()),
                            restart_policy: Some("OnFailure".to_string()),
                            tolerations: Some(vec![Toleration {
                                operator: Some("Exists".to_string()),
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
                                scanner_config_volume(&names::node_config_map(&owner.name), credentials),
                            ]),
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Node a CronJob is pinned to
pub fn pinned_node(cron_job: &CronJob) -> Option<&str> {
    cron_job
        .spec
        .as_ref()?
        .job_template
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .node_name
        .as_deref()
}

/// The last scheduled run has not succeeded and nothing is running
pub fn is_failing(cron_job: &CronJob) -> bool {
    let Some(status) = cron_job.status.as_ref() else {
        return false;
    };
    let Some(scheduled) = status.last_schedule_time.as_ref() else {
        return false;
    };
    let succeeded = status
        .last_successful_time
        .as_ref()
        .is_some_and(|done| done.0 >= scheduled.0);
    let running = status.active.as_ref().is_some_and(|a| !a.is_empty());
    !succeeded && !running
}
