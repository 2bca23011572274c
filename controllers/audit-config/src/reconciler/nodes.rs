//! Node scanning feature
//!
//! One CronJob per cluster node, all sharing a single inventory ConfigMap.
//! Each pass performs at most one CronJob mutation: missing CronJobs are
//! created first, then drifted ones updated, then orphans (whose node left
//! the cluster) deleted.

use std::collections::BTreeSet;

use cluster_client::ClusterClient;
use crds::{AuditConfigSpec, ConditionType};
use image_resolver::ImageResolver;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::ResourceExt;
use tracing::{debug, info};

use super::{FeatureReconciler, Outcome, PassContext};
use crate::conditions::ConditionUpdate;
use crate::equality::{
    are_config_maps_equal, are_cron_jobs_equal, are_resource_requirements_equal, update_config_map,
    update_cron_job,
};
use crate::error::ControllerError;
use crate::reconcile_helpers::{create_if_absent, delete_if_present, ensure, update};
use crate::resources::nodes::{config_map, cron_job, is_failing, pinned_node};
use crate::resources::{Component, Inventory, component_labels, names, selector};

/// Per-node filesystem scanners
#[derive(Debug, Clone, Copy, Default)]
pub struct Nodes;

#[async_trait::async_trait]
impl FeatureReconciler for Nodes {
    fn name(&self) -> &'static str {
        "nodes"
    }

    fn enabled(&self, spec: &AuditConfigSpec) -> bool {
        spec.nodes.enable
    }

    async fn reconcile<C: ClusterClient, R: ImageResolver>(
        &self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError> {
        let ns = ctx.namespace();
        let inventory = Inventory::nodes(ctx.owner).to_yaml()?;
        let change = ensure(
            ctx.client,
            ns,
            &config_map(ctx.owner, &inventory),
            are_config_maps_equal,
            update_config_map,
        )
        .await?;
        if change.mutated() {
            return Ok(Outcome::requeue());
        }

        let spec = &ctx.config.spec.nodes;
        let image = ctx
            .images
            .scanner_image(&spec.image.name, &spec.image.tag, ctx.operator.skip_container_resolution)
            .await?;

        let nodes: Vec<Node> = ctx.client.list_cluster("").await?;
        let desired: Vec<CronJob> = nodes
            .iter()
            .map(|node| cron_job(ctx.config, ctx.owner, &image, &node.name_any()))
            .collect();
        let live: Vec<CronJob> = ctx.client.list(ns, &cron_job_selector(ctx.name())).await?;
        debug!("{} nodes, {} node scan CronJobs", nodes.len(), live.len());

        let live_names: BTreeSet<String> = live.iter().map(ResourceExt::name_any).collect();
        if let Some(missing) = desired.iter().find(|d| !live_names.contains(&d.name_any())) {
            create_if_absent(ctx.client, ns, missing).await?;
            return Ok(Outcome::requeue());
        }

        for want in &desired {
            let Some(have) = live.iter().find(|l| l.name_any() == want.name_any()) else {
                continue;
            };
            if !cron_jobs_match(have, want) {
                let mut updated = have.clone();
                update_cron_job(&mut updated, want);
                update(ctx.client, ns, &updated).await?;
                return Ok(Outcome::requeue());
            }
        }

        let desired_names: BTreeSet<String> = desired.iter().map(ResourceExt::name_any).collect();
        if let Some(orphan) = live.iter().find(|l| !desired_names.contains(&l.name_any())) {
            info!(
                "Node {} for CronJob {}/{} is gone",
                pinned_node(orphan).unwrap_or("<unpinned>"),
                ns,
                orphan.name_any()
            );
            delete_if_present::<C, CronJob>(ctx.client, ns, &orphan.name_any()).await?;
            return Ok(Outcome::requeue());
        }

        let failing: Vec<String> = live.iter().filter(|c| is_failing(c)).map(ResourceExt::name_any).collect();
        let condition = if failing.is_empty() {
            ConditionUpdate::degraded(
                ConditionType::NodeScanningDegraded,
                false,
                "NodeScanningAvailable",
                format!("Node scanning is scheduled on {} nodes", desired.len()),
            )
        } else {
            ConditionUpdate::degraded(
                ConditionType::NodeScanningDegraded,
                true,
                "NodeScanningUnavailable",
                format!("Node scans failing: {}", failing.join(", ")),
            )
        };
        Ok(Outcome::done(condition))
    }

    async fn tear_down<C: ClusterClient, R: ImageResolver>(
        &self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError> {
        let ns = ctx.namespace();
        let live: Vec<CronJob> = ctx.client.list(ns, &cron_job_selector(ctx.name())).await?;
        let mut deleted = false;
        for job in &live {
            deleted |= delete_if_present::<C, CronJob>(ctx.client, ns, &job.name_any()).await?;
        }
        deleted |= delete_if_present::<C, ConfigMap>(ctx.client, ns, &names::node_config_map(ctx.name())).await?;

        let condition = ctx.disabled_condition(
            ConditionType::NodeScanningDegraded,
            "NodeScanningDisabled",
            "Node scanning is disabled",
        );
        Ok(Outcome::settled(deleted, condition))
    }
}

fn cron_job_selector(config: &str) -> String {
    selector(&component_labels(config, Component::Nodes))
}

/// Curated equality plus the fields only this feature varies: schedule and
/// scanner resources
fn cron_jobs_match(live: &CronJob, desired: &CronJob) -> bool {
    let schedule = |c: &CronJob| c.spec.as_ref().map(|s| s.schedule.clone()).unwrap_or_default();
    let resources = |c: &CronJob| {
        c.spec
            .as_ref()
            .and_then(|s| s.job_template.spec.as_ref())
            .and_then(|j| j.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.resources.clone())
            .unwrap_or_default()
    };
    are_cron_jobs_equal(live, desired)
        && schedule(live) == schedule(desired)
        && are_resource_requirements_equal(&resources(live), &resources(desired))
}
