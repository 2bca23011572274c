//! Admission webhook feature
//!
//! The webhook Deployment and Service are namespaced children with owner
//! references. The ValidatingWebhookConfiguration is cluster-scoped and
//! cannot be garbage collected through an owner reference, so a finalizer on
//! the AuditConfig guarantees it is removed before the AuditConfig goes away.

use cluster_client::ClusterClient;
use crds::{AuditConfig, AuditConfigSpec, ConditionType};
use image_resolver::ImageResolver;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::info;

use super::{FeatureReconciler, Outcome, PassContext};
use crate::conditions::ConditionUpdate;
use crate::equality::{are_deployments_equal, are_services_equal, update_deployment, update_service};
use crate::error::ControllerError;
use crate::reconcile_helpers::{delete_cluster_if_present, delete_if_present, ensure, ensure_cluster, update};
use crate::resources::admission::{
    are_webhook_configurations_equal, deployment, merge_webhook_configuration, service,
    validating_webhook_configuration,
};
use crate::resources::names;

/// Finalizer guarding removal of the cluster-scoped webhook registration
pub const WEBHOOK_FINALIZER: &str = "audit.microscaler.io/webhook-cleanup";

/// Validating admission webhook
#[derive(Debug, Clone, Copy, Default)]
pub struct Admission;

#[async_trait::async_trait]
impl FeatureReconciler for Admission {
    fn name(&self) -> &'static str {
        "admission"
    }

    fn enabled(&self, spec: &AuditConfigSpec) -> bool {
        spec.admission.enable
    }

    async fn reconcile<C: ClusterClient, R: ImageResolver>(
        &self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError> {
        let ns = ctx.namespace();
        if !has_finalizer(ctx.config) {
            add_finalizer(ctx.client, ctx.config).await?;
            return Ok(Outcome::requeue());
        }

        let spec = &ctx.config.spec.admission;
        let image = ctx
            .images
            .operator_image(&spec.image.name, &spec.image.tag, ctx.operator.skip_container_resolution)
            .await?;

        let desired = deployment(ctx.config, ctx.owner, &image);
        if ensure(ctx.client, ns, &desired, are_deployments_equal, update_deployment)
            .await?
            .mutated()
        {
            return Ok(Outcome::requeue());
        }
        if ensure(ctx.client, ns, &service(ctx.owner), are_services_equal, update_service)
            .await?
            .mutated()
        {
            return Ok(Outcome::requeue());
        }
        let webhook = validating_webhook_configuration(ctx.config, ctx.owner);
        if ensure_cluster(ctx.client, &webhook, are_webhook_configurations_equal, merge_webhook_configuration)
            .await?
            .mutated()
        {
            return Ok(Outcome::requeue());
        }

        let live = ctx.client.get::<Deployment>(ns, &desired.name_any()).await?;
        let status = live.and_then(|d| d.status).unwrap_or_default();
        let degraded = status.replicas.unwrap_or(0) != status.ready_replicas.unwrap_or(0);
        let condition = if degraded {
            ConditionUpdate::degraded(
                ConditionType::AdmissionDegraded,
                true,
                "AdmissionUnavailable",
                format!(
                    "Webhook has {}/{} ready replicas",
                    status.ready_replicas.unwrap_or(0),
                    status.replicas.unwrap_or(0)
                ),
            )
        } else {
            ConditionUpdate::degraded(
                ConditionType::AdmissionDegraded,
                false,
                "AdmissionAvailable",
                "Admission webhook is serving",
            )
        };
        Ok(Outcome::done(condition))
    }

    async fn tear_down<C: ClusterClient, R: ImageResolver>(
        &self,
        ctx: &PassContext<'_, C, R>,
    ) -> Result<Outcome, ControllerError> {
        let ns = ctx.namespace();
        let mut changed = delete_cluster_if_present::<C, ValidatingWebhookConfiguration>(
            ctx.client,
            &names::webhook_configuration(ns, ctx.name()),
        )
        .await?;
        changed |= delete_if_present::<C, Deployment>(ctx.client, ns, &names::webhook_deployment(ctx.name())).await?;
        changed |= delete_if_present::<C, Service>(ctx.client, ns, &names::webhook_service(ctx.name())).await?;
        if has_finalizer(ctx.config) {
            remove_finalizer(ctx.client, ctx.config).await?;
            changed = true;
        }

        let condition = ctx.disabled_condition(
            ConditionType::AdmissionDegraded,
            "AdmissionDisabled",
            "Admission webhook is disabled",
        );
        Ok(Outcome::settled(changed, condition))
    }
}

/// Whether the webhook cleanup finalizer is present
pub fn has_finalizer(config: &AuditConfig) -> bool {
    config.finalizers().iter().any(|f| f == WEBHOOK_FINALIZER)
}

async fn add_finalizer<C: ClusterClient>(client: &C, config: &AuditConfig) -> Result<(), ControllerError> {
    let mut updated = config.clone();
    updated.finalizers_mut().push(WEBHOOK_FINALIZER.to_string());
    update(client, &namespace_of(config)?, &updated).await?;
    info!("Added finalizer {} to AuditConfig {}", WEBHOOK_FINALIZER, config.name_any());
    Ok(())
}

async fn remove_finalizer<C: ClusterClient>(client: &C, config: &AuditConfig) -> Result<(), ControllerError> {
    let mut updated = config.clone();
    updated.finalizers_mut().retain(|f| f != WEBHOOK_FINALIZER);
    update(client, &namespace_of(config)?, &updated).await?;
    info!("Removed finalizer {} from AuditConfig {}", WEBHOOK_FINALIZER, config.name_any());
    Ok(())
}

fn namespace_of(config: &AuditConfig) -> Result<String, ControllerError> {
    config
        .namespace()
        .ok_or_else(|| ControllerError::InvalidConfig(format!("AuditConfig {} has no namespace", config.name_any())))
}

/// Remove the webhook registration of an AuditConfig that is being deleted,
/// then release it
pub async fn finalize<C: ClusterClient>(client: &C, config: &AuditConfig) -> Result<(), ControllerError> {
    if !has_finalizer(config) {
        return Ok(());
    }
    let ns = namespace_of(config)?;
    delete_cluster_if_present::<C, ValidatingWebhookConfiguration>(
        client,
        &names::webhook_configuration(&ns, &config.name_any()),
    )
    .await?;
    remove_finalizer(client, config).await
}
