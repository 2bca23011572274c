//! Helper functions for common reconciliation patterns
//!
//! Idempotent mutation primitives shared by every feature reconciler.
//! Each helper re-reads live state, so calling it again after success is a
//! no-op. Failures are logged with kind, namespace and name before being
//! returned.

use cluster_client::{ClusterClient, ClusterError, ClusterObject, NamespacedObject};
use kube::ResourceExt;
use tracing::{debug, error, info};

use crate::error::ControllerError;

/// Outcome of [`create_if_absent`]
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<K> {
    /// The object did not exist and was created
    Created(K),
    /// The object already existed and was left alone
    Existing(K),
}

impl<K> Applied<K> {
    /// Whether this call mutated the cluster
    pub fn created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// The created or existing object
    pub fn into_inner(self) -> K {
        match self {
            Self::Created(k) | Self::Existing(k) => k,
        }
    }
}

/// Outcome of [`ensure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Object was absent and has been created
    Created,
    /// Object differed and has been replaced
    Updated,
    /// Object matched the desired state
    Unchanged,
}

impl Change {
    /// Whether this call mutated the cluster
    pub fn mutated(self) -> bool {
        self != Self::Unchanged
    }
}

fn kind<K: kube::Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

fn log_failure<K: kube::Resource<DynamicType = ()>>(verb: &str, namespace: &str, name: &str, err: &ClusterError) {
    error!("Failed to {} {} {}/{}: {}", verb, kind::<K>(), namespace, name, err);
}

/// Create `desired` unless an object with its name exists
///
/// Existence is checked first, so `AlreadyExists` from the create means a
/// concurrent writer and is returned as an error.
pub async fn create_if_absent<C, K>(client: &C, namespace: &str, desired: &K) -> Result<Applied<K>, ControllerError>
where
    C: ClusterClient,
    K: NamespacedObject,
{
    let name = desired.name_any();
    let live = client.get::<K>(namespace, &name).await.map_err(|e| {
        log_failure::<K>("get", namespace, &name, &e);
        e
    })?;
    if let Some(live) = live {
        debug!("{} {}/{} already exists", kind::<K>(), namespace, name);
        return Ok(Applied::Existing(live));
    }

    let created = client.create(namespace, desired).await.map_err(|e| {
        log_failure::<K>("create", namespace, &name, &e);
        e
    })?;
    info!("Created {} {}/{}", kind::<K>(), namespace, name);
    Ok(Applied::Created(created))
}

/// Create directly, treating `AlreadyExists` as success
///
/// Needs no read permission on the kind. Returns whether the object was
/// created by this call.
pub async fn create_tolerating_existing<C, K>(client: &C, namespace: &str, obj: &K) -> Result<bool, ControllerError>
where
    C: ClusterClient,
    K: NamespacedObject,
{
    let name = obj.name_any();
    match client.create(namespace, obj).await {
        Ok(_) => {
            info!("Created {} {}/{}", kind::<K>(), namespace, name);
            Ok(true)
        }
        Err(e) if e.is_already_exists() => {
            debug!("{} {}/{} already exists", kind::<K>(), namespace, name);
            Ok(false)
        }
        Err(e) => {
            log_failure::<K>("create", namespace, &name, &e);
            Err(e.into())
        }
    }
}

/// Delete an object, treating `NotFound` as success
///
/// Returns whether an object was deleted by this call.
pub async fn delete_if_present<C, K>(client: &C, namespace: &str, name: &str) -> Result<bool, ControllerError>
where
    C: ClusterClient,
    K: NamespacedObject,
{
    match client.delete::<K>(namespace, name).await {
        Ok(()) => {
            info!("Deleted {} {}/{}", kind::<K>(), namespace, name);
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => {
            log_failure::<K>("delete", namespace, name, &e);
            Err(e.into())
        }
    }
}

/// Replace a live object, keeping its resource version
///
/// A concurrent writer surfaces as `Conflict`.
pub async fn update<C, K>(client: &C, namespace: &str, obj: &K) -> Result<K, ControllerError>
where
    C: ClusterClient,
    K: NamespacedObject,
{
    let name = obj.name_any();
    let updated = client.replace(namespace, &name, obj).await.map_err(|e| {
        log_failure::<K>("update", namespace, &name, &e);
        e
    })?;
    info!("Updated {} {}/{}", kind::<K>(), namespace, name);
    Ok(updated)
}

/// Converge one namespaced object on `desired`
///
/// Absent: created. Present and `equal(live, desired)`: untouched.
/// Otherwise `merge(&mut live, desired)` copies the managed fields onto the
/// live object, which is replaced with its original resource version so a
/// concurrent writer surfaces as a conflict.
pub async fn ensure<C, K, Equal, Merge>(
    client: &C,
    namespace: &str,
    desired: &K,
    equal: Equal,
    merge: Merge,
) -> Result<Change, ControllerError>
where
    C: ClusterClient,
    K: NamespacedObject,
    Equal: Fn(&K, &K) -> bool + Send,
    Merge: FnOnce(&mut K, &K) + Send,
{
    let live = match create_if_absent(client, namespace, desired).await? {
        Applied::Created(_) => return Ok(Change::Created),
        Applied::Existing(live) => live,
    };
    if equal(&live, desired) {
        return Ok(Change::Unchanged);
    }

    let mut updated = live;
    merge(&mut updated, desired);
    update(client, namespace, &updated).await?;
    Ok(Change::Updated)
}

/// Cluster-scoped counterpart of [`ensure`]
pub async fn ensure_cluster<C, K, Equal, Merge>(
    client: &C,
    desired: &K,
    equal: Equal,
    merge: Merge,
) -> Result<Change, ControllerError>
where
    C: ClusterClient,
    K: ClusterObject,
    Equal: Fn(&K, &K) -> bool + Send,
    Merge: FnOnce(&mut K, &K) + Send,
{
    let name = desired.name_any();
    let live = client.get_cluster::<K>(&name).await.map_err(|e| {
        log_failure::<K>("get", "", &name, &e);
        e
    })?;
    let Some(mut live) = live else {
        client.create_cluster(desired).await.map_err(|e| {
            log_failure::<K>("create", "", &name, &e);
            e
        })?;
        info!("Created {} {}", kind::<K>(), name);
        return Ok(Change::Created);
    };
    if equal(&live, desired) {
        return Ok(Change::Unchanged);
    }

    merge(&mut live, desired);
    client.replace_cluster(&name, &live).await.map_err(|e| {
        log_failure::<K>("update", "", &name, &e);
        e
    })?;
    info!("Updated {} {}", kind::<K>(), name);
    Ok(Change::Updated)
}

/// Cluster-scoped counterpart of [`delete_if_present`]
pub async fn delete_cluster_if_present<C, K>(client: &C, name: &str) -> Result<bool, ControllerError>
where
    C: ClusterClient,
    K: ClusterObject,
{
    match client.delete_cluster::<K>(name).await {
        Ok(()) => {
            info!("Deleted {} {}", kind::<K>(), name);
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => {
            log_failure::<K>("delete", "", name, &e);
            Err(e.into())
        }
    }
}
