//! In-memory cluster.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};

use super::{object_key, object_labels, DynamicWatcher, ObjectStore, ResourceDiscovery, ResourceMapping};
use crate::error::{CacheError, LookupError};
use crate::lookup::LabelSelector;
use crate::session::ObjectIdentifier;

/// Label prefix carrying node roles.
pub const NODE_ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

/// Group/version of the `ClusterClaim` resource.
pub const CLUSTER_CLAIM_API_VERSION: &str = "cluster.open-cluster-management.io/v1alpha1";

type ObjectKey = (String, String, String, String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WatchKey {
    Object(ObjectIdentifier),
    List {
        api_version: String,
        kind: String,
        namespace: String,
        selector: String,
    },
}

#[derive(Debug, Default)]
struct WatcherState {
    batch_open: bool,
    watches: HashSet<WatchKey>,
    used_in_batch: HashSet<WatchKey>,
}

#[derive(Debug, Default)]
struct ClusterState {
    resources: Vec<ResourceMapping>,
    objects: BTreeMap<ObjectKey, Value>,
    watchers: HashMap<ObjectIdentifier, WatcherState>,
}

/// A cluster held in memory.
///
/// Implements [`ResourceDiscovery`], [`ObjectStore`] and [`DynamicWatcher`].
/// Watches are bookkeeping only: they record what a watcher depends on and
/// are garbage collected at the end of each query batch.
///
/// A new cluster serves the core types the built-in functions use: `Secret`,
/// `ConfigMap`, `Namespace`, `Node`, `Pod` and `ClusterClaim`.
///
/// ```rust
/// use mantle::store::{MemoryCluster, ObjectStore, ResourceDiscovery};
///
/// let cluster = MemoryCluster::new()
///     .with_config_map("default", "settings", [("mode", "fast")]);
/// let mapping = cluster.resolve_kind("v1", "ConfigMap").unwrap();
/// let cm = ObjectStore::get(&cluster, &mapping, "default", "settings").unwrap();
/// assert_eq!(cm["data"]["mode"], "fast");
/// ```
#[derive(Debug)]
pub struct MemoryCluster {
    state: RwLock<ClusterState>,
    discovery_calls: AtomicUsize,
    reads: AtomicUsize,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        let resources = vec![
            ResourceMapping::new("v1", "Secret", "secrets", true),
            ResourceMapping::new("v1", "ConfigMap", "configmaps", true),
            ResourceMapping::new("v1", "Pod", "pods", true),
            ResourceMapping::new("v1", "Namespace", "namespaces", false),
            ResourceMapping::new("v1", "Node", "nodes", false),
            ResourceMapping::new(CLUSTER_CLAIM_API_VERSION, "ClusterClaim", "clusterclaims", false),
        ];
        Self {
            state: RwLock::new(ClusterState {
                resources,
                ..ClusterState::default()
            }),
            discovery_calls: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    /// Serves an additional resource type.
    pub fn with_resource(self, mapping: ResourceMapping) -> Self {
        self.add_resource(mapping);
        self
    }

    /// Stores an object, replacing any object with the same identity.
    pub fn with_object(self, object: Value) -> Self {
        self.insert(object);
        self
    }

    /// Stores a secret; values are base64-encoded as the API serves them.
    pub fn with_secret<'a>(
        self,
        namespace: &str,
        name: &str,
        data: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let data: Map<String, Value> = data
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(STANDARD.encode(v))))
            .collect();
        self.with_object(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"namespace": namespace, "name": name},
            "type": "Opaque",
            "data": data,
        }))
    }

    pub fn with_config_map<'a>(
        self,
        namespace: &str,
        name: &str,
        data: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let data: Map<String, Value> = data
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        self.with_object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"namespace": namespace, "name": name},
            "data": data,
        }))
    }

    /// Stores a node labeled with each of `roles`.
    pub fn with_node<'a>(self, name: &str, roles: impl IntoIterator<Item = &'a str>) -> Self {
        let labels: Map<String, Value> = roles
            .into_iter()
            .map(|role| (format!("{}{}", NODE_ROLE_LABEL_PREFIX, role), Value::String(String::new())))
            .chain([(
                "kubernetes.io/hostname".to_string(),
                Value::String(name.to_string()),
            )])
            .collect();
        self.with_object(json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {"name": name, "labels": labels},
        }))
    }

    pub fn with_cluster_claim(self, name: &str, value: &str) -> Self {
        self.with_object(json!({
            "apiVersion": CLUSTER_CLAIM_API_VERSION,
            "kind": "ClusterClaim",
            "metadata": {"name": name},
            "spec": {"value": value},
        }))
    }

    pub fn add_resource(&self, mapping: ResourceMapping) {
        let mut state = self.write();
        state
            .resources
            .retain(|m| !(m.api_version() == mapping.api_version() && m.kind == mapping.kind));
        state.resources.push(mapping);
    }

    /// Stores an object keyed by its `apiVersion`, `kind`, namespace and name.
    pub fn insert(&self, object: Value) {
        let key = key_of(&object);
        self.write().objects.insert(key, object);
    }

    /// Deletes an object; returns true if it existed.
    pub fn remove(&self, api_version: &str, kind: &str, namespace: &str, name: &str) -> bool {
        let key = (
            api_version.to_string(),
            kind.to_string(),
            namespace.to_string(),
            name.to_string(),
        );
        self.write().objects.remove(&key).is_some()
    }

    /// Number of discovery calls served.
    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    /// Number of get and list calls served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of watches held for `watcher`.
    pub fn watch_count(&self, watcher: &ObjectIdentifier) -> usize {
        self.read()
            .watchers
            .get(watcher)
            .map(|w| w.watches.len())
            .unwrap_or(0)
    }

    /// Returns true if `watcher` currently watches `object`.
    pub fn is_watching(&self, watcher: &ObjectIdentifier, object: &ObjectIdentifier) -> bool {
        self.read()
            .watchers
            .get(watcher)
            .is_some_and(|w| w.watches.contains(&WatchKey::Object(object.clone())))
    }

    pub fn has_open_batch(&self, watcher: &ObjectIdentifier) -> bool {
        self.read()
            .watchers
            .get(watcher)
            .is_some_and(|w| w.batch_open)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ClusterState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ClusterState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup_object(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
    ) -> Result<Value, LookupError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let namespace = if mapping.namespaced { namespace } else { "" };
        let key = (
            mapping.api_version(),
            mapping.kind.clone(),
            namespace.to_string(),
            name.to_string(),
        );
        self.read()
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| LookupError::not_found(&mapping.kind, namespace, name))
    }

    fn list_objects(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Vec<Value> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let api_version = mapping.api_version();
        self.read()
            .objects
            .iter()
            .filter(|((av, kind, ns, _), _)| {
                *av == api_version
                    && *kind == mapping.kind
                    && (namespace.is_empty() || !mapping.namespaced || ns == namespace)
            })
            .filter(|(_, object)| selector.matches(object_labels(object)))
            .map(|(_, object)| object.clone())
            .collect()
    }

    fn record_watch(&self, watcher: &ObjectIdentifier, key: WatchKey) {
        let mut state = self.write();
        let entry = state.watchers.entry(watcher.clone()).or_default();
        if entry.batch_open {
            entry.used_in_batch.insert(key.clone());
        }
        entry.watches.insert(key);
    }
}

fn key_of(object: &Value) -> ObjectKey {
    let field = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let (namespace, name) = object_key(object);
    (field("apiVersion"), field("kind"), namespace.to_string(), name.to_string())
}

impl ResourceDiscovery for MemoryCluster {
    fn resolve_kind(&self, api_version: &str, kind: &str) -> Result<ResourceMapping, LookupError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        self.read()
            .resources
            .iter()
            .find(|m| m.api_version() == api_version && m.kind == kind)
            .cloned()
            .ok_or_else(|| LookupError::missing_api_resource(api_version, kind))
    }
}

impl ObjectStore for MemoryCluster {
    fn get(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
    ) -> Result<Value, LookupError> {
        self.lookup_object(mapping, namespace, name)
    }

    fn list(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, LookupError> {
        Ok(self.list_objects(mapping, namespace, selector))
    }
}

impl DynamicWatcher for MemoryCluster {
    fn get_watched(
        &self,
        watcher: &ObjectIdentifier,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
    ) -> Result<Value, LookupError> {
        self.record_watch(watcher, WatchKey::Object(mapping.object(namespace, name)));
        self.lookup_object(mapping, namespace, name)
    }

    fn list_watched(
        &self,
        watcher: &ObjectIdentifier,
        mapping: &ResourceMapping,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, LookupError> {
        self.record_watch(
            watcher,
            WatchKey::List {
                api_version: mapping.api_version(),
                kind: mapping.kind.clone(),
                namespace: namespace.to_string(),
                selector: selector.to_string(),
            },
        );
        Ok(self.list_objects(mapping, namespace, selector))
    }

    fn start_query_batch(&self, watcher: &ObjectIdentifier) -> Result<(), CacheError> {
        let mut state = self.write();
        let entry = state.watchers.entry(watcher.clone()).or_default();
        if entry.batch_open {
            return Err(CacheError::BatchInProgress(watcher.to_string()));
        }
        entry.batch_open = true;
        entry.used_in_batch.clear();
        Ok(())
    }

    fn end_query_batch(&self, watcher: &ObjectIdentifier) -> Result<(), CacheError> {
        let mut state = self.write();
        let entry = match state.watchers.get_mut(watcher) {
            Some(entry) if entry.batch_open => entry,
            _ => return Err(CacheError::BatchNotStarted(watcher.to_string())),
        };

        let used = std::mem::take(&mut entry.used_in_batch);
        let before = entry.watches.len();
        entry.watches.retain(|w| used.contains(w));
        entry.batch_open = false;

        let removed = before - entry.watches.len();
        if removed > 0 {
            tracing::debug!(watcher = %watcher, removed, "removed stale watches");
        }
        Ok(())
    }

    fn remove_watcher(&self, watcher: &ObjectIdentifier) -> Result<(), CacheError> {
        match self.write().watchers.remove(watcher) {
            Some(_) => Ok(()),
            None => Err(CacheError::NoCacheEntry(watcher.to_string())),
        }
    }
}
