//! Interfaces to the cluster object store.
//!
//! The resolver never talks to a cluster directly. It goes through one of two
//! collaborators:
//!
//! - [`ObjectStore`]: plain get/list, used when caching is disabled
//! - [`DynamicWatcher`]: get/list that also registers watches on behalf of a
//!   watcher identity, grouped in query batches
//!
//! Both extend [`ResourceDiscovery`], which maps an `apiVersion`/`kind` pair to
//! the resource's coordinates. [`MemoryCluster`] implements all three in
//! memory.

mod discovery;
mod memory;

pub use discovery::DiscoveryCache;
pub use memory::{MemoryCluster, CLUSTER_CLAIM_API_VERSION, NODE_ROLE_LABEL_PREFIX};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, LookupError};
use crate::lookup::LabelSelector;
use crate::session::{join_api_version, ObjectIdentifier};

/// Full coordinates of an API resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceMapping {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name, e.g. `configmaps`.
    pub resource: String,
    pub namespaced: bool,
}

impl ResourceMapping {
    pub fn new(
        api_version: &str,
        kind: impl Into<String>,
        resource: impl Into<String>,
        namespaced: bool,
    ) -> Self {
        let (group, version) = crate::session::split_api_version(api_version);
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.into(),
            resource: resource.into(),
            namespaced,
        }
    }

    pub fn api_version(&self) -> String {
        join_api_version(&self.group, &self.version)
    }

    /// Identifier of an object of this type.
    pub fn object(&self, namespace: &str, name: &str) -> ObjectIdentifier {
        ObjectIdentifier {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Maps `apiVersion`/`kind` to resource coordinates.
pub trait ResourceDiscovery: Send + Sync {
    /// Returns [`LookupError::MissingApiResource`] when the type is not served.
    fn resolve_kind(&self, api_version: &str, kind: &str) -> Result<ResourceMapping, LookupError>;
}

/// Direct reads from the object store.
pub trait ObjectStore: ResourceDiscovery {
    /// Fetches one object. Returns [`LookupError::NotFound`] when it does not exist.
    /// `namespace` is empty for cluster-scoped resources.
    fn get(&self, mapping: &ResourceMapping, namespace: &str, name: &str)
        -> Result<Value, LookupError>;

    /// Lists objects matching `selector`. An empty namespace lists every
    /// namespace.
    fn list(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, LookupError>;
}

/// Reads that register watches for a watcher identity.
///
/// Between [`start_query_batch`](Self::start_query_batch) and
/// [`end_query_batch`](Self::end_query_batch) every watch the watcher uses is
/// marked; ending the batch drops the watches that were not used.
pub trait DynamicWatcher: ResourceDiscovery {
    fn get_watched(
        &self,
        watcher: &ObjectIdentifier,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
    ) -> Result<Value, LookupError>;

    fn list_watched(
        &self,
        watcher: &ObjectIdentifier,
        mapping: &ResourceMapping,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, LookupError>;

    /// Fails with [`CacheError::BatchInProgress`] when a batch is already open.
    fn start_query_batch(&self, watcher: &ObjectIdentifier) -> Result<(), CacheError>;

    /// Fails with [`CacheError::BatchNotStarted`] when no batch is open.
    fn end_query_batch(&self, watcher: &ObjectIdentifier) -> Result<(), CacheError>;

    /// Drops every watch of `watcher`.
    fn remove_watcher(&self, watcher: &ObjectIdentifier) -> Result<(), CacheError>;
}

/// Labels of an object, read from `metadata.labels`.
pub fn object_labels(object: &Value) -> impl Iterator<Item = (&str, &str)> {
    object
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|labels| labels.iter())
        .filter_map(|(k, v)| v.as_str().map(|v| (k.as_str(), v)))
}

/// `metadata.namespace` and `metadata.name` of an object.
pub fn object_key(object: &Value) -> (&str, &str) {
    let field = |path: &str| object.pointer(path).and_then(Value::as_str).unwrap_or("");
    (field("/metadata/namespace"), field("/metadata/name"))
}
