//! Admission webhook objects
//!
//! The webhook server runs from the operator image. Its TLS certificate
//! (and the CA bundle on the ValidatingWebhookConfiguration) are provided
//! by an external certificate manager.

use crds::{AdmissionMode, AuditConfig};
use k8s_openapi::api::admissionregistration::v1::{
    RuleWithOperations, ServiceReference, ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Service, ServicePort, ServiceSpec,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{Component, Owner, base_labels, component_labels, names, scan_api};

/// Port the webhook server listens on
pub const WEBHOOK_PORT: i32 = 9443;
/// Path the API server posts reviews to
pub const WEBHOOK_PATH: &str = "/validate-k8s-resources";

const CONTAINER_NAME: &str = "webhook";
const CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";

/// Webhook server Deployment
pub fn deployment(config: &AuditConfig, owner: &Owner, image: &str) -> Deployment {
    let labels = component_labels(&owner.name, Component::Webhook);
    let cert_secret = names::webhook_cert_secret(&owner.name);

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["audit-operator".to_string()]),
        args: Some(vec![
            "webhook".to_string(),
            format!("--port={WEBHOOK_PORT}"),
            format!("--cert-dir={CERT_DIR}"),
            format!("--mode={}", mode_name(config.spec.admission.mode)),
            format!("--scan-api-url={}", scan_api::url(owner)),
        ]),
        ports: Some(vec![ContainerPort {
            container_port: WEBHOOK_PORT,
            name: Some("webhook".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: "cert".to_string(),
            mount_path: CERT_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        env: Some(vec![EnvVar {
            name: "SCAN_API_TOKEN_SECRET".to_string(),
            value: Some(names::scan_api_secret(&owner.name)),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: owner.child_meta(names::webhook_deployment(&owner.name), Component::Webhook),
        spec: Some(DeploymentSpec {
            replicas: Some(config.spec.admission.replicas()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: "cert".to_string(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(cert_secret),
                            default_mode: Some(0o644),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service fronting the webhook Deployment on 443
pub fn service(owner: &Owner) -> Service {
    Service {
        metadata: owner.child_meta(names::webhook_service(&owner.name), Component::Webhook),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(component_labels(&owner.name, Component::Webhook)),
            ports: Some(vec![ServicePort {
                name: Some("webhook".to_string()),
                port: 443,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(WEBHOOK_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Cluster-scoped webhook registration
///
/// Carries no owner reference (a namespaced owner cannot own a
/// cluster-scoped object); it is removed on AuditConfig deletion through a
/// finalizer instead. The AuditConfig's own namespace is excluded so the
/// webhook never blocks its own rollout.
pub fn validating_webhook_configuration(config: &AuditConfig, owner: &Owner) -> ValidatingWebhookConfiguration {
    let failure_policy = match config.spec.admission.mode {
        AdmissionMode::Permissive => "Ignore",
        AdmissionMode::Enforcing => "Fail",
    };
    let operations = ["CREATE", "UPDATE"].map(String::from).to_vec();
    let rule = |group: &str, resources: &[&str]| RuleWithOperations {
        api_groups: Some(vec![group.to_string()]),
        api_versions: Some(vec!["v1".to_string()]),
        operations: Some(operations.clone()),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        scope: Some("*".to_string()),
    };

    let mut labels = base_labels(&owner.name);
    labels.insert("audit.microscaler.io/namespace".to_string(), owner.namespace.clone());

    ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(names::webhook_configuration(&owner.namespace, &owner.name)),
            labels: Some(labels),
            ..Default::default()
        },
        webhooks: Some(vec![ValidatingWebhook {
            name: format!("policy.{}.{}.audit.microscaler.io", owner.name, owner.namespace),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some(failure_policy.to_string()),
            match_policy: Some("Equivalent".to_string()),
            timeout_seconds: Some(10),
            client_config: WebhookClientConfig {
                service: Some(ServiceReference {
                    name: names::webhook_service(&owner.name),
                    namespace: owner.namespace.clone(),
                    path: Some(WEBHOOK_PATH.to_string()),
                    port: Some(443),
                }),
                ..Default::default()
            },
            rules: Some(vec![
                rule("", &["pods"]),
                rule("apps", &["deployments", "daemonsets", "statefulsets", "replicasets"]),
                rule("batch", &["jobs", "cronjobs"]),
            ]),
            namespace_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: "kubernetes.io/metadata.name".to_string(),
                    operator: "NotIn".to_string(),
                    values: Some(vec![owner.namespace.clone()]),
                }]),
                ..Default::default()
            }),
            object_selector: Some(LabelSelector::default()),
            ..Default::default()
        }]),
    }
}

/// Compare the webhook definitions, ignoring the externally injected CA bundle
pub fn are_webhook_configurations_equal(a: &ValidatingWebhookConfiguration, b: &ValidatingWebhookConfiguration) -> bool {
    let strip = |c: &ValidatingWebhookConfiguration| -> Vec<ValidatingWebhook> {
        c.webhooks
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|mut w| {
                w.client_config.ca_bundle = None;
                w
            })
            .collect()
    };
    strip(a) == strip(b) && a.metadata.labels == b.metadata.labels
}

/// Copy webhook definitions onto the live object, keeping its CA bundle
pub fn merge_webhook_configuration(live: &mut ValidatingWebhookConfiguration, desired: &ValidatingWebhookConfiguration) {
    let ca_bundle = live
        .webhooks
        .as_ref()
        .and_then(|w| w.first())
        .and_then(|w| w.client_config.ca_bundle.clone());
    let mut webhooks = desired.webhooks.clone().unwrap_or_default();
    for webhook in &mut webhooks {
        webhook.client_config.ca_bundle = ca_bundle.clone();
    }
    live.webhooks = Some(webhooks);
    live.metadata.labels = desired.metadata.labels.clone();
}

fn mode_name(mode: AdmissionMode) -> &'static str {
    match mode {
        AdmissionMode::Permissive => "permissive",
        AdmissionMode::Enforcing => "enforcing",
    }
}
