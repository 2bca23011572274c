//! Desired child objects
//!
//! Everything here is a pure function of the AuditConfig, its owner
//! reference and the resolved image. Names are deterministic so every pass
//! can find what earlier passes created.
//!
//! Templates set the fields the API server would otherwise default
//! (`defaultMode`, `protocol`, `targetPort`, ...). Curated equality then
//! sees the same values on the live object and does not schedule updates.

pub mod admission;
pub mod nodes;
pub mod scan_api;
pub mod workloads;

use std::collections::BTreeMap;

use crds::{AuditConfig, ResourceRequirementsSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapProjection, KeyToPath, ProjectedVolumeSource, ResourceRequirements, SecretProjection, Volume,
    VolumeProjection,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde::Serialize;

use crate::error::ControllerError;

/// `app.kubernetes.io/managed-by` value on every managed object
pub const MANAGED_BY: &str = "audit-operator";
/// Label carrying the owning AuditConfig's name
pub const CONFIG_LABEL: &str = "audit.microscaler.io/config";
/// Label carrying the feature an object belongs to
pub const COMPONENT_LABEL: &str = "audit.microscaler.io/component";
/// ConfigMap key holding the serialized inventory
pub const INVENTORY_KEY: &str = "inventory";
/// Secret key holding the scanner credentials
pub const CREDENTIALS_KEY: &str = "config";
/// Where the scanner finds its config files
pub const CONFIG_MOUNT_PATH: &str = "/etc/opt/";
/// Where the host root filesystem is mounted in scanner pods
pub const HOST_MOUNT_PATH: &str = "/mnt/host/";

const NODE_CRON_JOB_MAX_NAME: usize = 52;

/// Names of managed objects
pub mod names {
    use super::NODE_CRON_JOB_MAX_NAME;

    /// Workload scanner inventory ConfigMap
    pub fn workload_config_map(config: &str) -> String {
        format!("{config}-deploy")
    }

    /// Workload scanner Deployment
    pub fn workload_deployment(config: &str) -> String {
        format!("{config}-workload")
    }

    /// Workload scanner Deployment as named by earlier releases
    pub fn legacy_workload_deployment(config: &str) -> String {
        config.to_string()
    }

    /// Node scanner inventory ConfigMap
    pub fn node_config_map(config: &str) -> String {
        format!("{config}-node")
    }

    /// Per-node scan CronJob. CronJob names must leave room for the Job
    /// suffix, so long names are cut and made unique with a hash.
    pub fn node_cron_job(config: &str, node: &str) -> String {
        let full = format!("{config}-node-{node}");
        if full.len() <= NODE_CRON_JOB_MAX_NAME {
            return full;
        }
        let digest = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, full.as_bytes()).simple().to_string();
        let keep = NODE_CRON_JOB_MAX_NAME - 9;
        let prefix = full[..keep].trim_end_matches(['-', '.']);
        format!("{prefix}-{}", &digest[..8])
    }

    /// Admission webhook Deployment
    pub fn webhook_deployment(config: &str) -> String {
        format!("{config}-webhook-manager")
    }

    /// Admission webhook Service
    pub fn webhook_service(config: &str) -> String {
        format!("{config}-webhook-service")
    }

    /// TLS Secret for the webhook server, provisioned externally
    pub fn webhook_cert_secret(config: &str) -> String {
        format!("{config}-webhook-server-cert")
    }

    /// Cluster-scoped ValidatingWebhookConfiguration
    pub fn webhook_configuration(namespace: &str, config: &str) -> String {
        format!("{namespace}-{config}-audit")
    }

    /// Scan API token Secret
    pub fn scan_api_secret(config: &str) -> String {
        format!("{config}-scan-api-token")
    }

    /// Scan API Deployment and Service
    pub fn scan_api(config: &str) -> String {
        format!("{config}-scan-api")
    }
}

/// Feature a managed object belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Workload scanner
    Workloads,
    /// Per-node scanners
    Nodes,
    /// Admission webhook
    Webhook,
    /// Scan API
    ScanApi,
}

impl Component {
    /// Label value
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workloads => "workloads",
            Self::Nodes => "nodes",
            Self::Webhook => "webhook",
            Self::ScanApi => "scan-api",
        }
    }
}

/// Labels identifying objects of one AuditConfig
pub fn base_labels(config: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/managed-by".to_string(), MANAGED_BY.to_string()),
        (CONFIG_LABEL.to_string(), config.to_string()),
    ])
}

/// Labels identifying one feature's objects
pub fn component_labels(config: &str, component: Component) -> BTreeMap<String, String> {
    let mut labels = base_labels(config);
    labels.insert(COMPONENT_LABEL.to_string(), component.as_str().to_string());
    labels
}

/// Equality label selector (`a=b,c=d`) matching `labels`
pub fn selector(labels: &BTreeMap<String, String>) -> String {
    labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

/// Identity of the AuditConfig being reconciled, stamped onto children
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    /// AuditConfig name
    pub name: String,
    /// AuditConfig namespace, shared by all namespaced children
    pub namespace: String,
    /// Controller owner reference for namespaced children
    pub reference: OwnerReference,
}

impl Owner {
    /// Build from a loaded AuditConfig. Fails when the object lacks the
    /// name, namespace or uid an owner reference needs.
    pub fn of(config: &AuditConfig) -> Result<Self, ControllerError> {
        let name = config.name_any();
        let namespace = config
            .namespace()
            .ok_or_else(|| ControllerError::InvalidConfig(format!("AuditConfig {name} has no namespace")))?;
        let reference = config
            .controller_owner_ref(&())
            .ok_or_else(|| ControllerError::InvalidConfig(format!("AuditConfig {namespace}/{name} has no uid")))?;
        Ok(Self {
            name,
            namespace,
            reference,
        })
    }

    /// Metadata for a namespaced child object
    pub fn child_meta(&self, name: String, component: Component) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(component_labels(&self.name, component)),
            owner_references: Some(vec![self.reference.clone()]),
            ..Default::default()
        }
    }
}

/// Container resources, falling back to defaults for an empty side
pub fn resource_requirements(spec: &ResourceRequirementsSpec) -> ResourceRequirements {
    let to_map = |m: &BTreeMap<String, String>, defaults: [(&str, &str); 2]| -> BTreeMap<String, Quantity> {
        if m.is_empty() {
            defaults.iter().map(|(k, v)| (k.to_string(), Quantity(v.to_string()))).collect()
        } else {
            m.iter().map(|(k, v)| (k.clone(), Quantity(v.clone()))).collect()
        }
    };
    ResourceRequirements {
        limits: Some(to_map(&spec.limits, [("cpu", "500m"), ("memory", "512Mi")])),
        requests: Some(to_map(&spec.requests, [("cpu", "100m"), ("memory", "128Mi")])),
        ..Default::default()
    }
}

/// Projected `config` volume combining the inventory ConfigMap and, when
/// configured, the credentials Secret
pub fn scanner_config_volume(config_map: &str, credentials_secret: Option<&str>) -> Volume {
    let mut sources = vec![VolumeProjection {
        config_map: Some(ConfigMapProjection {
            name: config_map.to_string(),
            items: Some(vec![KeyToPath {
                key: INVENTORY_KEY.to_string(),
                path: "audit/inventory.yml".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }];
    if let Some(secret) = credentials_secret {
        sources.push(VolumeProjection {
            secret: Some(SecretProjection {
                name: secret.to_string(),
                items: Some(vec![KeyToPath {
                    key: CREDENTIALS_KEY.to_string(),
                    path: "audit/config.yml".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    Volume {
        name: "config".to_string(),
        projected: Some(ProjectedVolumeSource {
            default_mode: Some(0o644),
            sources: Some(sources),
        }),
        ..Default::default()
    }
}

/// Inventory document consumed by the scanner
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    api_version: String,
    kind: String,
    metadata: InventoryMetadata,
    spec: InventorySpec,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct InventoryMetadata {
    name: String,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct InventorySpec {
    assets: Vec<InventoryAsset>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct InventoryAsset {
    id: String,
    name: String,
    connections: Vec<InventoryConnection>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct InventoryConnection {
    #[serde(rename = "type")]
    type_: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    discover: Option<InventoryDiscovery>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct InventoryDiscovery {
    targets: Vec<String>,
}

impl Inventory {
    fn new(owner: &Owner, asset_id: &str, connection: InventoryConnection) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Inventory".to_string(),
            metadata: InventoryMetadata {
                name: format!("{}-inventory", owner.name),
                labels: base_labels(&owner.name),
            },
            spec: InventorySpec {
                assets: vec![InventoryAsset {
                    id: asset_id.to_string(),
                    name: format!("{}/{}", owner.namespace, asset_id),
                    connections: vec![connection],
                }],
            },
        }
    }

    /// Cluster API discovery for the workload scanner
    pub fn workloads(owner: &Owner) -> Self {
        Self::new(
            owner,
            "api-server",
            InventoryConnection {
                type_: "k8s".to_string(),
                host: None,
                discover: Some(InventoryDiscovery {
                    targets: vec!["auto".to_string()],
                }),
            },
        )
    }

    /// Host filesystem scan for the node scanners
    pub fn nodes(owner: &Owner) -> Self {
        Self::new(
            owner,
            "host",
            InventoryConnection {
                type_: "fs".to_string(),
                host: Some(HOST_MOUNT_PATH.trim_end_matches('/').to_string()),
                discover: None,
            },
        )
    }

    /// Serialize as YAML
    pub fn to_yaml(&self) -> Result<String, ControllerError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
