//! Reconciliation logic for AuditConfig resources.
//!
//! One pass loads the AuditConfig and runs the features in a fixed order:
//! - `workloads`: cluster workload scanner (ConfigMap + Deployment)
//! - `nodes`: one scan CronJob per cluster node
//! - `admission`: validating webhook (Deployment, Service, webhook registration)
//! - `scan_api`: scan API (token Secret, Deployment, Service)
//!
//! A feature that changes cluster state ends the pass with a requeue, so
//! every pass performs at most one feature's worth of mutations. Conditions
//! collected along the way are written back in a single status patch. A
//! failing feature aborts the pass and nothing is persisted.

pub mod admission;
pub mod nodes;
pub mod scan_api;
pub mod workloads;

#[cfg(test)]
mod nodes_test;
#[cfg(test)]
mod workloads_test;

use std::sync::Arc;

use chrono::Utc;
use cluster_client::ClusterClient;
use crds::{AuditConfig, AuditConfigSpec, AuditConfigStatus, ConditionType, OperatorConfig, OperatorConfigSpec};
use image_resolver::ImageResolver;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{Instrument, debug, info, info_span};

use crate::conditions::{ConditionUpdate, apply_updates};
use crate::error::ControllerError;
use crate::health::Metrics;
use crate::resources::{Component, Owner, component_labels, selector};

/// Whether a feature (or a whole pass) left the cluster as it found it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Nothing changed; wait for the next event or resync
    Done,
    /// State was just mutated; check again shortly
    Requeue,
}

/// Result of running one feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Done or requeue
    pub progress: Progress,
    /// Condition the feature wants recorded, if any
    pub condition: Option<ConditionUpdate>,
}

impl Outcome {
    /// Converged, reporting `condition`
    pub fn done(condition: ConditionUpdate) -> Self {
        Self {
            progress: Progress::Done,
            condition: Some(condition),
        }
    }

    /// Mutated the cluster; nothing to report yet
    pub fn requeue() -> Self {
        Self {
            progress: Progress::Requeue,
            condition: None,
        }
    }

    /// Requeue when `mutated`, otherwise done; either way report `condition`
    pub fn settled(mutated: bool, condition: Option<ConditionUpdate>) -> Self {
        Self {
            progress: if mutated { Progress::Requeue } else { Progress::Done },
            condition,
        }
    }
}

/// Everything a feature needs for one pass
///
/// Built fresh for every pass; features hold no state of their own.
pub struct PassContext<'a, C, R> {
    /// Cluster access
    pub client: &'a C,
    /// Image resolution
    pub images: &'a R,
    /// The AuditConfig as loaded at the start of the pass
    pub config: &'a AuditConfig,
    /// Owner identity stamped onto children
    pub owner: &'a Owner,
    /// Cluster-wide policy
    pub operator: &'a OperatorConfigSpec,
}

impl<C, R> PassContext<'_, C, R> {
    /// Namespace of the AuditConfig and all namespaced children
    pub fn namespace(&self) -> &str {
        &self.owner.namespace
    }

    /// Name of the AuditConfig
    pub fn name(&self) -> &str {
        &self.owner.name
    }

    /// Condition recording that a feature is switched off. Only produced
    /// when the feature has reported before, so never-enabled features do
    /// not clutter the status.
    pub fn disabled_condition(&self, type_: ConditionType, reason: &str, message: &str) -> Option<ConditionUpdate> {
        let reported = self
            .config
            .status
            .as_ref()
            .is_some_and(|s| crds::find_condition(&s.conditions, type_).is_some());
        reported.then(|| ConditionUpdate::degraded(type_, false, reason, message))
    }
}

/// Capability shared by every feature
#[async_trait::async_trait]
pub trait FeatureReconciler: Send + Sync {
    /// Name used in logs, spans and metrics
    fn name(&self) -> &'static str;

    /// Whether the AuditConfig asks for this feature
    fn enabled(&self, spec: &AuditConfigSpec) -> bool;

    /// Drive the feature's objects towards their desired state
    async fn reconcile<C: ClusterClient, R: ImageResolver>(
        &self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError>;

    /// Remove the feature's objects
    async fn tear_down<C: ClusterClient, R: ImageResolver>(
        &self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError>;
}

/// The fixed set of features, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Cluster workload scanner
    Workloads,
    /// Per-node scanners
    Nodes,
    /// Admission webhook
    Admission,
    /// Scan API
    ScanApi,
}

impl Feature {
    /// Execution order
    pub const ALL: [Self; 4] = [Self::Workloads, Self::Nodes, Self::Admission, Self::ScanApi];

    /// Name used in logs, spans and metrics
    pub fn name(self) -> &'static str {
        match self {
            Self::Workloads => workloads::Workloads.name(),
            Self::Nodes => nodes::Nodes.name(),
            Self::Admission => admission::Admission.name(),
            Self::ScanApi => scan_api::ScanApi.name(),
        }
    }

    async fn run<C: ClusterClient, R: ImageResolver>(
        self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError> {
        match self {
            Self::Workloads => drive(&workloads::Workloads, ctx).await,
            Self::Nodes => drive(&nodes::Nodes, ctx).await,
            Self::Admission => drive(&admission::Admission, ctx).await,
            Self::ScanApi => drive(&scan_api::ScanApi, ctx).await,
        }
    }
}

async fn drive<F, C, R>(feature: &F, ctx: &PassContext<'_, C, R>) -> Result<Outcome, ControllerError>
where
    F: FeatureReconciler,
    C: ClusterClient,
    R: ImageResolver,
{
    if feature.enabled(&ctx.config.spec) {
        feature.reconcile(ctx).await
    } else {
        feature.tear_down(ctx).await
    }
}

/// Reconciles AuditConfig resources.
pub struct Reconciler<C, R> {
    client: C,
    images: R,
    operator_config_name: String,
    metrics: Arc<Metrics>,
}

impl<C, R> std::fmt::Debug for Reconciler<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("operator_config_name", &self.operator_config_name)
            .finish_non_exhaustive()
    }
}

impl<C: ClusterClient, R: ImageResolver> Reconciler<C, R> {
    /// Creates a new reconciler instance.
    pub fn new(client: C, images: R, operator_config_name: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            images,
            operator_config_name: operator_config_name.into(),
            metrics,
        }
    }

    /// Run one pass for the AuditConfig `namespace/name`
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Progress, ControllerError> {
        let span = info_span!("reconcile", audit_config = %format!("{namespace}/{name}"));
        let result = self.reconcile_pass(namespace, name).instrument(span).await;
        self.metrics.record_reconcile(match &result {
            Ok(Progress::Done) => "converged",
            Ok(Progress::Requeue) => "requeue",
            Err(_) => "error",
        });
        result
    }

    async fn reconcile_pass(&self, namespace: &str, name: &str) -> Result<Progress, ControllerError> {
        let Some(config) = self.client.get::<AuditConfig>(namespace, name).await? else {
            info!("AuditConfig {}/{} not found, nothing to do", namespace, name);
            return Ok(Progress::Done);
        };

        if config.metadata.deletion_timestamp.is_some() {
            info!("AuditConfig {}/{} is being deleted", namespace, name);
            admission::finalize(&self.client, &config).await?;
            return Ok(Progress::Done);
        }

        let operator = self.operator_config().await?;
        let owner = Owner::of(&config)?;
        let ctx = PassContext {
            client: &self.client,
            images: &self.images,
            config: &config,
            owner: &owner,
            operator: &operator,
        };

        let mut updates = Vec::new();
        let mut progress = Progress::Done;
        for feature in Feature::ALL {
            let outcome = feature
                .run(&ctx)
                .instrument(info_span!("feature", name = feature.name()))
                .await?;
            updates.extend(outcome.condition);
            if outcome.progress == Progress::Requeue {
                debug!("Feature {} changed cluster state, requeueing", feature.name());
                self.metrics.record_feature_mutation(feature.name());
                progress = Progress::Requeue;
                break;
            }
        }

        self.persist_status(&config, &owner, &updates).await?;
        Ok(progress)
    }

    async fn operator_config(&self) -> Result<OperatorConfigSpec, ControllerError> {
        let config = self.client.get_cluster::<OperatorConfig>(&self.operator_config_name).await?;
        if config.is_none() {
            debug!("OperatorConfig {} not found, using defaults", self.operator_config_name);
        }
        Ok(config.map(|c| c.spec).unwrap_or_default())
    }

    /// Write conditions and the managed pod list, skipping the patch when
    /// nothing changed
    async fn persist_status(
        &self,
        config: &AuditConfig,
        owner: &Owner,
        updates: &[ConditionUpdate],
    ) -> Result<(), ControllerError> {
        let current = config.status.clone().unwrap_or_default();
        let conditions = apply_updates(&current.conditions, updates, Utc::now());

        let pod_selector = selector(&component_labels(&owner.name, Component::Workloads));
        let mut pods: Vec<String> = self
            .client
            .list::<Pod>(&owner.namespace, &pod_selector)
            .await?
            .iter()
            .map(ResourceExt::name_any)
            .collect();
        pods.sort();

        let next = AuditConfigStatus { conditions, pods };
        if next == current {
            debug!("Status of AuditConfig {}/{} unchanged", owner.namespace, owner.name);
            return Ok(());
        }

        self.client
            .patch_status::<AuditConfig>(&owner.namespace, &owner.name, serde_json::to_value(&next)?)
            .await?;
        info!("Updated status of AuditConfig {}/{}", owner.namespace, owner.name);
        Ok(())
    }
}
