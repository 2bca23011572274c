//! Kubernetes API access for the audit operator
//!
//! Reconcilers talk to the cluster exclusively through [`ClusterClient`], a
//! small typed surface over Get/List/Create/Replace/Delete and status
//! patches. The production implementation wraps `kube::Api`; the mock keeps
//! objects in memory so reconcilers can be exercised without a cluster.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, KubeClusterClient};
//! use k8s_openapi::api::core::v1::ConfigMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//! let cm: Option<ConfigMap> = client.get("audit", "audit-config-deploy").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::{ClusterClient, ClusterObject, NamespacedObject};
pub use error::ClusterError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockCall, MockClusterClient, Verb};
