//! Mock ClusterClient for unit testing
//!
//! Objects are kept as JSON in memory, keyed by kind, namespace and name.
//! The mock behaves like a minimal API server: it assigns resource
//! versions, rejects stale replaces with `Conflict`, keeps the stored
//! `status` when the main resource is replaced, and records every mutating
//! call so tests can assert idempotence by counting.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::cluster_trait::{ClusterClient, ClusterObject, NamespacedObject};
use crate::error::ClusterError;

/// API verb, used for the call log and for error injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Read a single object
    Get,
    /// Read a collection
    List,
    /// Create
    Create,
    /// Replace
    Replace,
    /// Delete
    Delete,
    /// Status subresource merge patch
    PatchStatus,
}

impl Verb {
    fn is_mutation(self) -> bool {
        !matches!(self, Self::Get | Self::List)
    }
}

/// One recorded mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Verb performed
    pub verb: Verb,
    /// Object kind, e.g. `Deployment`
    pub kind: String,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    kind: String,
    namespace: Option<String>,
    name: String,
}

type ErrorFactory = Arc<dyn Fn() -> ClusterError + Send + Sync>;

struct InjectedError {
    verb: Verb,
    kind: String,
    make: ErrorFactory,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    calls: Vec<MockCall>,
    errors: Vec<InjectedError>,
    next_version: u64,
}

/// In-memory ClusterClient
#[derive(Clone, Default)]
pub struct MockClusterClient {
    state: Arc<Mutex<State>>,
}

impl fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockClusterClient").finish_non_exhaustive()
    }
}

impl MockClusterClient {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panicking test thread poisons the lock; the data is still usable.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed a namespaced object without recording a call
    pub fn insert<K: NamespacedObject>(&self, namespace: &str, obj: &K) {
        let mut value = serde_json::to_value(obj).unwrap_or(Value::Null);
        let name = object_name(&value);
        let mut state = self.lock();
        stamp(&mut value, Some(namespace), &mut state.next_version);
        let key = key_for::<K>(Some(namespace), &name);
        state.objects.insert(key, value);
    }

    /// Seed a cluster-scoped object without recording a call
    pub fn insert_cluster<K: ClusterObject>(&self, obj: &K) {
        let mut value = serde_json::to_value(obj).unwrap_or(Value::Null);
        let name = object_name(&value);
        let mut state = self.lock();
        stamp(&mut value, None, &mut state.next_version);
        let key = key_for::<K>(None, &name);
        state.objects.insert(key, value);
    }

    /// Read a stored namespaced object without recording a call
    pub fn stored<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(&key_for::<K>(Some(namespace), name))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Read a stored cluster-scoped object without recording a call
    pub fn stored_cluster<K: ClusterObject>(&self, name: &str) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(&key_for::<K>(None, name))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// All stored namespaced objects of kind `K` in a namespace
    pub fn stored_all<K: NamespacedObject>(&self, namespace: &str) -> Vec<K> {
        let kind = K::kind(&()).to_string();
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind && k.namespace.as_deref() == Some(namespace))
            .filter_map(|(_, v)| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    /// Overwrite the `status` of a stored object, as a controller in the
    /// cluster would. Not recorded and does not bump the resource version.
    pub fn set_status<K: NamespacedObject>(&self, namespace: &str, name: &str, status: Value) {
        let mut state = self.lock();
        if let Some(obj) = state.objects.get_mut(&key_for::<K>(Some(namespace), name)) {
            obj["status"] = status;
        }
    }

    /// Apply an arbitrary edit to a stored object, simulating an external
    /// writer. Bumps the resource version.
    pub fn modify<K: NamespacedObject>(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut K)) {
        let mut state = self.lock();
        let key = key_for::<K>(Some(namespace), name);
        let Some(current) = state.objects.get(&key).cloned() else {
            return;
        };
        let Ok(mut typed) = serde_json::from_value::<K>(current) else {
            return;
        };
        edit(&mut typed);
        let mut value = serde_json::to_value(&typed).unwrap_or(Value::Null);
        stamp(&mut value, Some(namespace), &mut state.next_version);
        state.objects.insert(key, value);
    }

    /// Make every `verb` on `kind` fail with the produced error until
    /// [`Self::clear_errors`] is called
    pub fn inject_error(&self, verb: Verb, kind: &str, make: impl Fn() -> ClusterError + Send + Sync + 'static) {
        self.lock().errors.push(InjectedError {
            verb,
            kind: kind.to_string(),
            make: Arc::new(make),
        });
    }

    /// Drop all injected errors
    pub fn clear_errors(&self) {
        self.lock().errors.clear();
    }

    /// Recorded mutating calls, oldest first
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded mutating calls
    pub fn mutation_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Forget recorded calls (stored objects are kept)
    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    fn check(&self, verb: Verb, kind: &str) -> Result<(), ClusterError> {
        let state = self.lock();
        match state.errors.iter().find(|e| e.verb == verb && e.kind == kind) {
            Some(injected) => Err((injected.make)()),
            None => Ok(()),
        }
    }

    fn record(state: &mut State, verb: Verb, kind: &str, namespace: Option<&str>, name: &str) {
        if verb.is_mutation() {
            state.calls.push(MockCall {
                verb,
                kind: kind.to_string(),
                namespace: namespace.map(str::to_string),
                name: name.to_string(),
            });
        }
    }

    fn do_get<K: serde::de::DeserializeOwned>(&self, key: &ObjectKey) -> Result<Option<K>, ClusterError> {
        self.check(Verb::Get, &key.kind)?;
        let state = self.lock();
        match state.objects.get(key) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    fn do_list<K: serde::de::DeserializeOwned>(
        &self,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<K>, ClusterError> {
        self.check(Verb::List, kind)?;
        let selector = parse_selector(label_selector);
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind && k.namespace.as_deref() == namespace)
            .filter(|(_, v)| matches_selector(v, &selector))
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(ClusterError::from))
            .collect()
    }

    fn do_create<K: serde::Serialize + serde::de::DeserializeOwned>(
        &self,
        kind: &str,
        namespace: Option<&str>,
        obj: &K,
    ) -> Result<K, ClusterError> {
        let mut value = serde_json::to_value(obj)?;
        let name = object_name(&value);
        if name.is_empty() {
            return Err(ClusterError::Api {
                code: 422,
                message: format!("{kind}: metadata.name is required"),
            });
        }
        self.check(Verb::Create, kind)?;
        let key = ObjectKey {
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.clone(),
        };
        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("{kind} {name}")));
        }
        stamp(&mut value, namespace, &mut state.next_version);
        if value["metadata"].get("uid").is_none() {
            value["metadata"]["uid"] = Value::String(uuid::Uuid::new_v4().to_string());
        }
        state.objects.insert(key, value.clone());
        Self::record(&mut state, Verb::Create, kind, namespace, &name);
        Ok(serde_json::from_value(value)?)
    }

    fn do_replace<K: serde::Serialize + serde::de::DeserializeOwned>(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        obj: &K,
    ) -> Result<K, ClusterError> {
        self.check(Verb::Replace, kind)?;
        let key = ObjectKey {
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        };
        let mut value = serde_json::to_value(obj)?;
        let mut state = self.lock();
        let Some(current) = state.objects.get(&key) else {
            return Err(ClusterError::NotFound(format!("{kind} {name}")));
        };
        let sent_version = value["metadata"].get("resourceVersion").cloned();
        if let Some(sent) = sent_version {
            if Some(&sent) != current["metadata"].get("resourceVersion") {
                return Err(ClusterError::Conflict(format!(
                    "{kind} {name}: the object has been modified; please apply your changes to the latest version"
                )));
            }
        }
        if let Some(status) = current.get("status").cloned() {
            value["status"] = status;
        }
        if let Some(uid) = current["metadata"].get("uid").cloned() {
            value["metadata"]["uid"] = uid;
        }
        stamp(&mut value, namespace, &mut state.next_version);
        state.objects.insert(key, value.clone());
        Self::record(&mut state, Verb::Replace, kind, namespace, name);
        Ok(serde_json::from_value(value)?)
    }

    fn do_delete(&self, kind: &str, namespace: Option<&str>, name: &str) -> Result<(), ClusterError> {
        self.check(Verb::Delete, kind)?;
        let key = ObjectKey {
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        };
        let mut state = self.lock();
        match state.objects.remove(&key) {
            Some(_) => {
                Self::record(&mut state, Verb::Delete, kind, namespace, name);
                Ok(())
            }
            None => Err(ClusterError::NotFound(format!("{kind} {name}"))),
        }
    }
}

fn key_for<K: kube::Resource<DynamicType = ()>>(namespace: Option<&str>, name: &str) -> ObjectKey {
    ObjectKey {
        kind: K::kind(&()).to_string(),
        namespace: namespace.map(str::to_string),
        name: name.to_string(),
    }
}

fn object_name(value: &Value) -> String {
    value["metadata"]["name"].as_str().unwrap_or_default().to_string()
}

fn stamp(value: &mut Value, namespace: Option<&str>, next_version: &mut u64) {
    *next_version += 1;
    if !value["metadata"].is_object() {
        value["metadata"] = Value::Object(serde_json::Map::new());
    }
    value["metadata"]["resourceVersion"] = Value::String(next_version.to_string());
    if let Some(ns) = namespace {
        value["metadata"]["namespace"] = Value::String(ns.to_string());
    }
}

fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn matches_selector(value: &Value, selector: &[(String, String)]) -> bool {
    let labels = &value["metadata"]["labels"];
    selector
        .iter()
        .all(|(k, v)| labels.get(k).and_then(Value::as_str) == Some(v.as_str()))
}

fn merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge_patch(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, ClusterError> {
        self.do_get(&key_for::<K>(Some(namespace), name))
    }

    async fn list<K: NamespacedObject>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>, ClusterError> {
        self.do_list(&K::kind(&()), Some(namespace), label_selector)
    }

    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K, ClusterError> {
        self.do_create(&K::kind(&()), Some(namespace), obj)
    }

    async fn replace<K: NamespacedObject>(&self, namespace: &str, name: &str, obj: &K) -> Result<K, ClusterError> {
        self.do_replace(&K::kind(&()), Some(namespace), name, obj)
    }

    async fn delete<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.do_delete(&K::kind(&()), Some(namespace), name)
    }

    async fn patch_status<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        status: Value,
    ) -> Result<(), ClusterError> {
        let kind = K::kind(&()).to_string();
        self.check(Verb::PatchStatus, &kind)?;
        let mut state = self.lock();
        let Some(obj) = state.objects.get_mut(&key_for::<K>(Some(namespace), name)) else {
            return Err(ClusterError::NotFound(format!("{kind} {name}")));
        };
        let existing = obj.get("status").cloned().unwrap_or(Value::Null);
        let mut merged = if existing.is_object() { existing } else { Value::Object(serde_json::Map::new()) };
        merge_patch(&mut merged, &status);
        obj["status"] = merged;
        Self::record(&mut state, Verb::PatchStatus, &kind, Some(namespace), name);
        Ok(())
    }

    async fn get_cluster<K: ClusterObject>(&self, name: &str) -> Result<Option<K>, ClusterError> {
        self.do_get(&key_for::<K>(None, name))
    }

    async fn list_cluster<K: ClusterObject>(&self, label_selector: &str) -> Result<Vec<K>, ClusterError> {
        self.do_list(&K::kind(&()), None, label_selector)
    }

    async fn create_cluster<K: ClusterObject>(&self, obj: &K) -> Result<K, ClusterError> {
        self.do_create(&K::kind(&()), None, obj)
    }

    async fn replace_cluster<K: ClusterObject>(&self, name: &str, obj: &K) -> Result<K, ClusterError> {
        self.do_replace(&K::kind(&()), None, name, obj)
    }

    async fn delete_cluster<K: ClusterObject>(&self, name: &str) -> Result<(), ClusterError> {
        self.do_delete(&K::kind(&()), None, name)
    }
}
