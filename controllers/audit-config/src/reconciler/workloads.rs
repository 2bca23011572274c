//! Workload scanning feature
//!
//! One inventory ConfigMap and one scanner Deployment. The Deployment's pod
//! template records which inventory revision its pods were started with; a
//! stale revision on an otherwise converged Deployment triggers a rolling
//! restart.

use std::collections::BTreeMap;

use chrono::Utc;
use cluster_client::ClusterClient;
use crds::{AuditConfigSpec, ConditionType};
use image_resolver::ImageResolver;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use tracing::{debug, info};

use super::{FeatureReconciler, Outcome, PassContext};
use crate::conditions::ConditionUpdate;
use crate::equality::{
    are_config_maps_equal, are_deployments_and_resources_equal, update_config_map, update_deployment,
};
use crate::error::ControllerError;
use crate::reconcile_helpers::{create_if_absent, delete_if_present, ensure, update};
use crate::resources::workloads::{
    INVENTORY_REVISION_ANNOTATION, RESTARTED_AT_ANNOTATION, config_map, deployment, inventory_revision,
    pod_inventory_revision,
};
use crate::resources::{Inventory, names};

/// Cluster workload scanner
#[derive(Debug, Clone, Copy, Default)]
pub struct Workloads;

#[async_trait::async_trait]
impl FeatureReconciler for Workloads {
    fn name(&self) -> &'static str {
        "workloads"
    }

    fn enabled(&self, spec: &AuditConfigSpec) -> bool {
        spec.workloads.enable
    }

    async fn reconcile<C: ClusterClient, R: ImageResolver>(
        &self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError> {
        let ns = ctx.namespace();
        let inventory = Inventory::workloads(ctx.owner).to_yaml()?;

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

        let spec = &ctx.config.spec.workloads;
        let image = ctx
            .images
            .scanner_image(&spec.image.name, &spec.image.tag, ctx.operator.skip_container_resolution)
            .await?;
        let desired = deployment(ctx.config, ctx.owner, &image, &inventory);

        let live = match create_if_absent(ctx.client, ns, &desired).await? {
            applied if applied.created() => return Ok(Outcome::requeue()),
            applied => applied.into_inner(),
        };

        if !are_deployments_and_resources_equal(&live, &desired) {
            let mut updated = live.clone();
            update_deployment(&mut updated, &desired);
            if let Some(restarted_at) = template_annotation(&live, RESTARTED_AT_ANNOTATION) {
                set_template_annotation(&mut updated, RESTARTED_AT_ANNOTATION, restarted_at.to_string());
            }
            update(ctx.client, ns, &updated).await?;
            return Ok(Outcome::requeue());
        }

        let revision = inventory_revision(&inventory);
        if pod_inventory_revision(&live) != Some(revision.as_str()) {
            let mut restarted = live.clone();
            set_template_annotation(&mut restarted, RESTARTED_AT_ANNOTATION, Utc::now().to_rfc3339());
            set_template_annotation(&mut restarted, INVENTORY_REVISION_ANNOTATION, revision);
            update(ctx.client, ns, &restarted).await?;
            info!("Restarting workload scanner {}/{} for new inventory", ns, live.name_any());
            return Ok(Outcome::requeue());
        }

        let degraded = !is_available(&live);
        let condition = if degraded {
            ConditionUpdate::degraded(
                ConditionType::WorkloadScanningDegraded,
                true,
                "WorkloadScanningUnavailable",
                "Workload scanner Deployment is not ready",
            )
        } else {
            ConditionUpdate::degraded(
                ConditionType::WorkloadScanningDegraded,
                false,
                "WorkloadScanningAvailable",
                "Workload scanner is running",
            )
        };

        let cleaned = if ctx.operator.disable_legacy_workload_cleanup {
            false
        } else {
            remove_legacy_deployment(ctx).await?
        };
        Ok(Outcome::settled(cleaned, Some(condition)))
    }

    async fn tear_down<C: ClusterClient, R: ImageResolver>(
        &self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError> {
        let ns = ctx.namespace();
        let deleted_deployment =
            delete_if_present::<C, Deployment>(ctx.client, ns, &names::workload_deployment(ctx.name())).await?;
        let deleted_config_map =
            delete_if_present::<C, ConfigMap>(ctx.client, ns, &names::workload_config_map(ctx.name())).await?;

        let condition = ctx.disabled_condition(
            ConditionType::WorkloadScanningDegraded,
            "WorkloadScanningDisabled",
            "Workload scanning is disabled",
        );
        Ok(Outcome::settled(deleted_deployment || deleted_config_map, condition))
    }
}

fn is_available(deployment: &Deployment) -> bool {
    let status = deployment.status.clone().unwrap_or_default();
    status.replicas.unwrap_or(0) == status.ready_replicas.unwrap_or(0)
}

fn template_annotation<'a>(deployment: &'a Deployment, key: &str) -> Option<&'a str> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(key)
        .map(String::as_str)
}

fn set_template_annotation(deployment: &mut Deployment, key: &str, value: String) {
    let spec = deployment.spec.get_or_insert_with(Default::default);
    spec.template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value);
}

/// Delete the Deployment older releases created under the bare config name.
/// Only a Deployment owned by this AuditConfig is touched.
async fn remove_legacy_deployment<C: ClusterClient, R: ImageResolver>(
    ctx: &PassContext<'_, C, R>,
) -> Result<bool, ControllerError> {
    let ns = ctx.namespace();
    let name = names::legacy_workload_deployment(ctx.name());
    let Some(legacy) = ctx.client.get::<Deployment>(ns, &name).await? else {
        return Ok(false);
    };
    let owned = legacy
        .owner_references()
        .iter()
        .any(|r| r.uid == ctx.owner.reference.uid);
    if !owned {
        debug!("Deployment {}/{} is not owned by this AuditConfig, leaving it", ns, name);
        return Ok(false);
    }
    info!("Removing legacy workload scanner Deployment {}/{}", ns, name);
    delete_if_present::<C, Deployment>(ctx.client, ns, &name).await
}
