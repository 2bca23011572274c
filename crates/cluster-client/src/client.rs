//! `kube::Api` backed implementation of [`ClusterClient`]

use std::fmt;

use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

use crate::cluster_trait::{ClusterClient, ClusterObject, NamespacedObject};
use crate::error::ClusterError;

/// Talks to the API server through a shared `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K: NamespacedObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn all<K: ClusterObject>(&self) -> Api<K> {
        Api::all(self.client.clone())
    }
}

impl fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, ClusterError> {
        debug!("GET {} {}/{}", K::kind(&()), namespace, name);
        Ok(self.namespaced::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K: NamespacedObject>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>, ClusterError> {
        debug!("LIST {} in {} ({})", K::kind(&()), namespace, label_selector);
        let params = ListParams::default().labels(label_selector);
        Ok(self.namespaced::<K>(namespace).list(&params).await?.items)
    }

    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K, ClusterError> {
        debug!("CREATE {} in {}", K::kind(&()), namespace);
        Ok(self.namespaced::<K>(namespace).create(&PostParams::default(), obj).await?)
    }

    async fn replace<K: NamespacedObject>(&self, namespace: &str, name: &str, obj: &K) -> Result<K, ClusterError> {
        debug!("REPLACE {} {}/{}", K::kind(&()), namespace, name);
        Ok(self.namespaced::<K>(namespace).replace(name, &PostParams::default(), obj).await?)
    }

    async fn delete<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        debug!("DELETE {} {}/{}", K::kind(&()), namespace, name);
        self.namespaced::<K>(namespace).delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn patch_status<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), ClusterError> {
        debug!("PATCH status {} {}/{}", K::kind(&()), namespace, name);
        let patch = json!({ "status": status });
        self.namespaced::<K>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_cluster<K: ClusterObject>(&self, name: &str) -> Result<Option<K>, ClusterError> {
        debug!("GET {} {}", K::kind(&()), name);
        Ok(self.all::<K>().get_opt(name).await?)
    }

    async fn list_cluster<K: ClusterObject>(&self, label_selector: &str) -> Result<Vec<K>, ClusterError> {
        debug!("LIST {} ({})", K::kind(&()), label_selector);
        let params = ListParams::default().labels(label_selector);
        Ok(self.all::<K>().list(&params).await?.items)
    }

    async fn create_cluster<K: ClusterObject>(&self, obj: &K) -> Result<K, ClusterError> {
        debug!("CREATE {}", K::kind(&()));
        Ok(self.all::<K>().create(&PostParams::default(), obj).await?)
    }

    async fn replace_cluster<K: ClusterObject>(&self, name: &str, obj: &K) -> Result<K, ClusterError> {
        debug!("REPLACE {} {}", K::kind(&()), name);
        Ok(self.all::<K>().replace(name, &PostParams::default(), obj).await?)
    }

    async fn delete_cluster<K: ClusterObject>(&self, name: &str) -> Result<(), ClusterError> {
        debug!("DELETE {} {}", K::kind(&()), name);
        self.all::<K>().delete(name, &DeleteParams::background()).await?;
        Ok(())
    }
}
