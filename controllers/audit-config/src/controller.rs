//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Kubernetes
//! client, image resolver, probe server and AuditConfig watcher together.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cluster_client::KubeClusterClient;
use image_resolver::RegistryImageResolver;
use kube::Client;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backoff::BackoffTracker;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::health::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::watcher::{Context, watch_audit_configs};

/// Main controller for AuditConfig resources.
pub struct Controller {
    client: Client,
    context: Arc<Context>,
    ready: Arc<AtomicBool>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts the probe server.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing AuditConfig controller");

        let client = Client::try_default().await?;
        let images = RegistryImageResolver::new()?;
        let metrics = Arc::new(Metrics::new()?);
        let reconciler = Reconciler::new(
            KubeClusterClient::new(client.clone()),
            images,
            config.operator_config_name.clone(),
            metrics.clone(),
        );

        let ready = Arc::new(AtomicBool::new(false));
        let probe_server = tokio::spawn(health::serve(config.probe_address, ready.clone(), metrics));

        let context = Arc::new(Context {
            reconciler,
            backoff: BackoffTracker::default(),
            config,
        });

        Ok(Self {
            client,
            context,
            ready,
            probe_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("AuditConfig controller running");
        self.ready.store(true, Ordering::Relaxed);

        let result = tokio::select! {
            result = watch_audit_configs(self.client.clone(), self.context.clone()) => result,
            result = &mut self.probe_server => match result {
                Ok(Ok(())) => Err(ControllerError::Io(std::io::Error::other("probe server exited"))),
                Ok(Err(e)) => {
                    error!("Probe server failed: {}", e);
                    Err(e)
                }
                Err(e) => Err(ControllerError::Io(std::io::Error::other(format!("probe server panicked: {e}")))),
            },
        };

        self.ready.store(false, Ordering::Relaxed);
        self.probe_server.abort();
        info!("AuditConfig controller stopped");
        result
    }
}
