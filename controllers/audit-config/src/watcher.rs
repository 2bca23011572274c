//! Kubernetes resource watchers.
//!
//! Drives [`Reconciler`] from a `kube_runtime::Controller` over AuditConfigs.
//! Changes to owned children (Deployments, ConfigMaps, Services, CronJobs)
//! re-trigger their owner, and a change to the OperatorConfig singleton
//! re-triggers every known AuditConfig. Node membership changes are picked
//! up on the periodic resync.

use std::future::Future;
use std::sync::Arc;

use cluster_client::KubeClusterClient;
use crds::{AuditConfig, OperatorConfig};
use futures::StreamExt;
use image_resolver::RegistryImageResolver;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{Controller, watcher};
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffTracker;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::{Progress, Reconciler};
use crate::resources::MANAGED_BY;

/// Shared state handed to every reconcile call
#[derive(Debug)]
pub struct Context {
    /// Pass logic
    pub reconciler: Reconciler<KubeClusterClient, RegistryImageResolver>,
    /// Failure backoff per AuditConfig
    pub backoff: BackoffTracker,
    /// Process settings
    pub config: ControllerConfig,
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn object_key(config: &AuditConfig) -> String {
    format!("{}/{}", config.namespace().unwrap_or_default(), config.name_any())
}

/// Every AuditConfig currently in the controller's cache
fn all_audit_configs(store: &Store<AuditConfig>) -> Vec<ObjectRef<AuditConfig>> {
    store.state().iter().map(|c| ObjectRef::from_obj(c.as_ref())).collect()
}

/// Watch AuditConfigs and their children until a shutdown signal arrives
pub async fn watch_audit_configs(client: Client, ctx: Arc<Context>) -> Result<(), ControllerError> {
    let namespace = ctx.config.namespace.clone();
    let ns = namespace.as_deref();
    info!("Starting AuditConfig watcher ({})", ns.unwrap_or("all namespaces"));

    let children = watcher::Config::default().labels(&format!("app.kubernetes.io/managed-by={MANAGED_BY}"));
    let controller = Controller::new(scoped::<AuditConfig>(&client, ns), watcher::Config::default());
    let store = controller.store();
    let operator_config_name = ctx.config.operator_config_name.clone();

    controller
        .owns(scoped::<Deployment>(&client, ns), children.clone())
        .owns(scoped::<ConfigMap>(&client, ns), children.clone())
        .owns(scoped::<Service>(&client, ns), children.clone())
        .owns(scoped::<CronJob>(&client, ns), children)
        .watches(
            Api::<OperatorConfig>::all(client.clone()),
            watcher::Config::default(),
            move |operator: OperatorConfig| {
                if operator.name_any() == operator_config_name {
                    all_audit_configs(&store)
                } else {
                    Vec::new()
                }
            },
        )
        .shutdown_on_signal()
        .with_config(RuntimeConfig::default().concurrency(ctx.config.concurrency))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled AuditConfig {}", obj),
                Err(e) => warn!("AuditConfig controller error: {}", e),
            }
        })
        .await;

    info!("AuditConfig watcher stopped");
    Ok(())
}

async fn reconcile(config: Arc<AuditConfig>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let namespace = config.namespace().unwrap_or_default();
    let name = config.name_any();
    let progress = with_deadline(
        ctx.config.reconcile_timeout,
        ctx.reconciler.reconcile(&namespace, &name),
    )
    .await?;
    ctx.backoff.reset(&object_key(&config));
    Ok(success_action(progress, &ctx.config))
}

fn error_policy(config: Arc<AuditConfig>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    failure_action(error, &object_key(&config), &ctx.backoff, &ctx.config)
}

/// Bound one pass by `deadline`
pub async fn with_deadline<F>(deadline: std::time::Duration, pass: F) -> Result<Progress, ControllerError>
where
    F: Future<Output = Result<Progress, ControllerError>>,
{
    tokio::time::timeout(deadline, pass)
        .await
        .map_err(|_elapsed| ControllerError::Timeout(deadline.as_secs()))?
}

/// Next check after a successful pass
pub fn success_action(progress: Progress, config: &ControllerConfig) -> Action {
    match progress {
        Progress::Done => Action::requeue(config.resync_interval),
        Progress::Requeue => Action::requeue(config.requeue_interval),
    }
}

/// Next attempt after a failed pass. Conflicts only mean another writer
/// got there first and are retried at the requeue interval.
pub fn failure_action(error: &ControllerError, key: &str, backoff: &BackoffTracker, config: &ControllerConfig) -> Action {
    if error.is_conflict() {
        warn!("Conflict reconciling AuditConfig {}, retrying: {}", key, error);
        return Action::requeue(config.requeue_interval);
    }
    let delay = backoff.next_failure_delay(key);
    error!(
        "Reconciliation failed for AuditConfig {}, retrying in {}s: {}",
        key,
        delay.as_secs(),
        error
    );
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cluster_client::ClusterError;

    use super::*;

    fn forbidden() -> ControllerError {
        ControllerError::Cluster(ClusterError::Api {
            code: 403,
            message: "forbidden".to_string(),
        })
    }

    #[test]
    fn test_success_actions() {
        let config = ControllerConfig::default();
        assert_eq!(success_action(Progress::Done, &config), Action::requeue(Duration::from_secs(600)));
        assert_eq!(success_action(Progress::Requeue, &config), Action::requeue(Duration::from_secs(1)));
    }

    #[test]
    fn test_conflict_retries_quickly() {
        let config = ControllerConfig::default();
        let backoff = BackoffTracker::default();
        let conflict = ControllerError::Cluster(ClusterError::Conflict("AuditConfig audit".to_string()));

        for _ in 0..3 {
            assert_eq!(
                failure_action(&conflict, "security/audit", &backoff, &config),
                Action::requeue(Duration::from_secs(1))
            );
        }
        // Conflicts do not advance the failure backoff
        assert_eq!(backoff.next_failure_delay("security/audit"), Duration::from_secs(30));
    }

    #[test]
    fn test_failures_back_off_per_key() {
        let config = ControllerConfig::default();
        let backoff = BackoffTracker::default();
        let err = forbidden();

        let delays: Vec<Action> = (0..4)
            .map(|_| failure_action(&err, "security/audit", &backoff, &config))
            .collect();
        let expected: Vec<Action> = [30, 30, 60, 90]
            .into_iter()
            .map(|s| Action::requeue(Duration::from_secs(s)))
            .collect();
        assert_eq!(delays, expected);

        assert_eq!(
            failure_action(&err, "other/audit", &backoff, &config),
            Action::requeue(Duration::from_secs(30))
        );
        backoff.reset("security/audit");
        assert_eq!(
            failure_action(&err, "security/audit", &backoff, &config),
            Action::requeue(Duration::from_secs(30))
        );
    }

    #[tokio::test]
    async fn test_deadline_turns_hung_pass_into_timeout() {
        let result = with_deadline(Duration::from_millis(10), std::future::pending()).await;
        assert!(matches!(result, Err(ControllerError::Timeout(_))));

        let result = with_deadline(Duration::from_secs(5), async { Ok(Progress::Done) }).await;
        assert_eq!(result.unwrap(), Progress::Done);
    }
}
