//! Scan API feature
//!
//! Token Secret, Deployment and Service. The Secret is created directly and
//! an existing one is accepted as-is, so the token survives restarts of the
//! operator and needs no read permission on Secrets.

use cluster_client::ClusterClient;
use crds::{AuditConfigSpec, ConditionType};
use image_resolver::ImageResolver;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::ResourceExt;

use super::{FeatureReconciler, Outcome, PassContext};
use crate::conditions::ConditionUpdate;
use crate::equality::{are_deployments_and_resources_equal, are_services_equal, update_deployment, update_service};
use crate::error::ControllerError;
use crate::reconcile_helpers::{create_tolerating_existing, delete_if_present, ensure};
use crate::resources::scan_api::{deployment, service, token_secret};
use crate::resources::{Owner, names};

/// In-cluster scan API
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanApi;

#[async_trait::async_trait]
impl FeatureReconciler for ScanApi {
    fn name(&self) -> &'static str {
        "scan-api"
    }

    fn enabled(&self, spec: &AuditConfigSpec) -> bool {
        spec.scan_api_enabled()
    }

    async fn reconcile<C: ClusterClient, R: ImageResolver>(
        &self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError> {
        let spec = &ctx.config.spec.scan_api;
        let image = ctx
            .images
            .scanner_image(&spec.image.name, &spec.image.tag, ctx.operator.skip_container_resolution)
            .await?;
        let desired = deployment(ctx.config, ctx.owner, &image);
        if deploy(ctx.client, ctx.owner, &desired).await? {
            return Ok(Outcome::requeue());
        }

        let live = ctx.client.get::<Deployment>(ctx.namespace(), &desired.name_any()).await?;
        let status = live.and_then(|d| d.status).unwrap_or_default();
        let degraded = status.replicas.unwrap_or(0) != status.ready_replicas.unwrap_or(0);
        let condition = if degraded {
            ConditionUpdate::degraded(
                ConditionType::ScanApiDegraded,
                true,
                "ScanApiUnavailable",
                "Scan API Deployment is not ready",
            )
        } else {
            ConditionUpdate::degraded(ConditionType::ScanApiDegraded, false, "ScanApiAvailable", "Scan API is serving")
        };
        Ok(Outcome::done(condition))
    }

    async fn tear_down<C: ClusterClient, R: ImageResolver>(
        &self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError> {
        let deleted = cleanup(ctx.client, ctx.owner).await?;
        let condition =
            ctx.disabled_condition(ConditionType::ScanApiDegraded, "ScanApiDisabled", "Scan API is disabled");
        Ok(Outcome::settled(deleted, condition))
    }
}

/// Create or converge the token Secret, the Deployment and the Service, in
/// that order. Returns whether anything changed.
pub async fn deploy<C: ClusterClient>(client: &C, owner: &Owner, desired: &Deployment) -> Result<bool, ControllerError> {
    let ns = owner.namespace.as_str();
    let mut changed = create_tolerating_existing(client, ns, &token_secret(owner)).await?;
    changed |= ensure(client, ns, desired, are_deployments_and_resources_equal, update_deployment)
        .await?
        .mutated();
    changed |= ensure(client, ns, &service(owner), are_services_equal, update_service)
        .await?
        .mutated();
    Ok(changed)
}

/// Delete the Secret, Deployment and Service, in that order. Safe to call
/// when none of them exist. Returns whether anything was deleted.
pub async fn cleanup<C: ClusterClient>(client: &C, owner: &Owner) -> Result<bool, ControllerError> {
    let ns = owner.namespace.as_str();
    let mut deleted = delete_if_present::<C, Secret>(client, ns, &names::scan_api_secret(&owner.name)).await?;
    deleted |= delete_if_present::<C, Deployment>(client, ns, &names::scan_api(&owner.name)).await?;
    deleted |= delete_if_present::<C, Service>(client, ns, &names::scan_api(&owner.name)).await?;
    Ok(deleted)
}
