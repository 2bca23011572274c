//! AuditConfig Controller
//!
//! Reconciles `AuditConfig` resources into the objects that run security
//! scanning in the cluster:
//! - Workloads: a scanner Deployment fed by an inventory ConfigMap
//! - Nodes: one scan CronJob per cluster node
//! - Admission: a validating webhook Deployment, Service and registration
//! - Scan API: token Secret, Deployment and Service
//!
//! Progress is reported through degraded conditions on the AuditConfig.

mod backoff;
mod conditions;
mod config;
mod controller;
mod equality;
mod error;
mod health;
mod quantity;
mod reconcile_helpers;
mod reconciler;
mod resources;
mod test_utils;
mod watcher;

#[cfg(test)]
mod conditions_test;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{ControllerConfig, LogFormat};
use crate::controller::Controller;
use crate::error::ControllerError;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube and reqwest both pull in rustls; pick the provider explicitly
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = ControllerConfig::from_env()?;
    init_tracing(config.log_format);

    info!("Starting AuditConfig Controller");
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  OperatorConfig: {}", config.operator_config_name);
    info!("  Concurrency: {}", config.concurrency);
    info!("  Probe address: {}", config.probe_address);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
