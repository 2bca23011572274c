//! ClusterClient trait for mocking
//!
//! This trait abstracts the Kubernetes API so that reconcilers can run
//! against the in-memory mock in unit tests. All methods are typed over
//! k8s-openapi / kube-derive objects; namespaced and cluster-scoped kinds get
//! separate methods because they are addressed differently.

use std::fmt::Debug;

use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ClusterError;

/// A namespaced Kubernetes object the client can read and write.
pub trait NamespacedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> NamespacedObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// A cluster-scoped Kubernetes object the client can read and write.
pub trait ClusterObject:
    Resource<DynamicType = (), Scope = ClusterResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ClusterObject for K where
    K: Resource<DynamicType = (), Scope = ClusterResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Trait for Kubernetes API operations used by the reconcilers
///
/// Reads return `Ok(None)` for absent objects so callers can branch on
/// existence without matching errors. Writes surface `NotFound`,
/// `AlreadyExists` and `Conflict` as distinct [`ClusterError`] variants.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a namespaced object by name
    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, ClusterError>;

    /// List namespaced objects matching an equality label selector (`a=b,c=d`)
    async fn list<K: NamespacedObject>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>, ClusterError>;

    /// Create a namespaced object
    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K, ClusterError>;

    /// Replace a namespaced object. A stale `resourceVersion` yields `Conflict`.
    async fn replace<K: NamespacedObject>(&self, namespace: &str, name: &str, obj: &K) -> Result<K, ClusterError>;

    /// Delete a namespaced object with background propagation
    async fn delete<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Merge-patch the status subresource with `{"status": status}`
    async fn patch_status<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), ClusterError>;

    /// Fetch a cluster-scoped object by name
    async fn get_cluster<K: ClusterObject>(&self, name: &str) -> Result<Option<K>, ClusterError>;

    /// List cluster-scoped objects matching an equality label selector
    async fn list_cluster<K: ClusterObject>(&self, label_selector: &str) -> Result<Vec<K>, ClusterError>;

    /// Create a cluster-scoped object
    async fn create_cluster<K: ClusterObject>(&self, obj: &K) -> Result<K, ClusterError>;

    /// Replace a cluster-scoped object
    async fn replace_cluster<K: ClusterObject>(&self, name: &str, obj: &K) -> Result<K, ClusterError>;

    /// Delete a cluster-scoped object
    async fn delete_cluster<K: ClusterObject>(&self, name: &str) -> Result<(), ClusterError>;
}
