//! Resource lookups on behalf of a template.
//!
//! A lookup is created per resolution call. It enforces the namespace
//! restriction and the cluster-scoped allowlist, resolves kinds through the
//! resolver's [`DiscoveryCache`], and records every object it touches in the
//! call's [`ResolutionSession`].
//!
//! A missing object is always recorded as referenced. The generic `lookup`
//! function resolves it to `{}`; the typed helpers fail with
//! [`LookupError::NotFound`]. A missing API resource type is never an error:
//! it sets the session flag and resolves empty.
//!
//! Restriction violations always fail the call.

mod selector;

pub use selector::LabelSelector;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::error::{LookupError, TemplateError};
use crate::options::ClusterScopedObjectIdentifier;
use crate::session::{ObjectIdentifier, ResolutionSession};
use crate::store::{DiscoveryCache, DynamicWatcher, ObjectStore, ResourceMapping};

/// Applies a namespace restriction to a requested namespace.
///
/// Without a restriction the request passes through. With one, an empty
/// request resolves to the restricted namespace, a matching request is kept,
/// and anything else fails naming `function`.
///
/// ```rust
/// use mantle::lookup::effective_namespace;
///
/// assert_eq!(effective_namespace(None, "lookup", "any").unwrap(), "any");
/// assert_eq!(effective_namespace(Some("team"), "lookup", "").unwrap(), "team");
/// assert!(effective_namespace(Some("team"), "lookup", "other").is_err());
/// ```
pub fn effective_namespace(
    restriction: Option<&str>,
    function: &str,
    requested: &str,
) -> Result<String, LookupError> {
    match restriction {
        None => Ok(requested.to_string()),
        Some(allowed) if requested.is_empty() || requested == allowed => Ok(allowed.to_string()),
        Some(allowed) => Err(LookupError::RestrictedNamespace {
            function: function.to_string(),
            namespace: requested.to_string(),
            allowed: allowed.to_string(),
        }),
    }
}

type GetKey = (String, String, String, String);

/// Memoizes reads for the length of one non-caching call.
#[derive(Debug, Default)]
pub(crate) struct CallCache {
    gets: Mutex<HashMap<GetKey, Result<Value, LookupError>>>,
    lists: Mutex<HashMap<GetKey, Result<Vec<Value>, LookupError>>>,
}

impl CallCache {
    fn get_or_fetch<T: Clone>(
        map: &Mutex<HashMap<GetKey, Result<T, LookupError>>>,
        key: GetKey,
        fetch: impl FnOnce() -> Result<T, LookupError>,
    ) -> Result<T, LookupError> {
        if let Some(hit) = map.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return hit.clone();
        }
        let result = fetch();
        map.lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, result.clone());
        result
    }
}

pub(crate) enum Backend {
    Direct {
        store: Arc<dyn ObjectStore>,
        cache: CallCache,
    },
    Watched {
        watcher: Arc<dyn DynamicWatcher>,
        id: ObjectIdentifier,
    },
}

/// Lookup state for one resolution call.
pub(crate) struct Lookup {
    backend: Backend,
    discovery: Arc<DiscoveryCache>,
    namespace_restriction: Option<String>,
    cluster_scoped_allowlist: Vec<ClusterScopedObjectIdentifier>,
    session: Arc<ResolutionSession>,
}

impl Lookup {
    pub(crate) fn new(
        backend: Backend,
        discovery: Arc<DiscoveryCache>,
        namespace_restriction: Option<String>,
        cluster_scoped_allowlist: Vec<ClusterScopedObjectIdentifier>,
        session: Arc<ResolutionSession>,
    ) -> Self {
        Self {
            backend,
            discovery,
            namespace_restriction,
            cluster_scoped_allowlist,
            session,
        }
    }

    pub(crate) fn session(&self) -> &ResolutionSession {
        &self.session
    }

    /// The generic `lookup` function.
    ///
    /// With a name, returns the object or `{}` when it does not exist.
    /// Without one, returns a list object whose `items` match the selectors.
    pub(crate) fn lookup(
        &self,
        function: &str,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
        selectors: &[String],
    ) -> Result<Value, LookupError> {
        let Some((mapping, namespace)) = self.target(function, api_version, kind, namespace, name)?
        else {
            return Ok(json!({}));
        };

        if mapping.group.is_empty() && mapping.kind == "Secret" {
            self.session.mark_sensitive();
        }

        if !name.is_empty() {
            return match self.get(&mapping, &namespace, name) {
                Ok(object) => Ok(object),
                Err(err) if err.is_not_found() => {
                    tracing::debug!(kind, namespace = %namespace, name, "object not found");
                    Ok(json!({}))
                }
                Err(err) => Err(err),
            };
        }

        let selector = LabelSelector::parse(selectors)?;
        let items = self.list(&mapping, &namespace, &selector)?;
        Ok(json!({
            "apiVersion": api_version,
            "kind": format!("{}List", mapping.kind),
            "metadata": {},
            "items": items,
        }))
    }

    /// Fetches one object for a typed helper such as `fromSecret`.
    ///
    /// `Ok(None)` means the API resource type does not exist. A missing
    /// object is a [`LookupError::NotFound`].
    pub(crate) fn fetch(
        &self,
        function: &str,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, LookupError> {
        match self.target(function, api_version, kind, namespace, name)? {
            Some((mapping, namespace)) => self.get(&mapping, &namespace, name).map(Some),
            None => Ok(None),
        }
    }

    /// Lists objects of a kind for a typed helper.
    pub(crate) fn fetch_list(
        &self,
        function: &str,
        api_version: &str,
        kind: &str,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, LookupError> {
        match self.target(function, api_version, kind, namespace, "")? {
            Some((mapping, namespace)) => self.list(&mapping, &namespace, selector),
            None => Ok(Vec::new()),
        }
    }

    /// Applies the restrictions and resolves the kind.
    fn target(
        &self,
        function: &str,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<(ResourceMapping, String)>, LookupError> {
        let namespace =
            effective_namespace(self.namespace_restriction.as_deref(), function, namespace)?;

        let mapping = match self.discover(api_version, kind) {
            Ok(mapping) => mapping,
            Err(err) if err.is_missing_api_resource() => {
                tracing::debug!(api_version, kind, "API resource not installed, resolving empty");
                self.session.mark_missing_api_resource();
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if mapping.namespaced {
            return Ok(Some((mapping, namespace)));
        }

        if self.namespace_restriction.is_some()
            && !self
                .cluster_scoped_allowlist
                .iter()
                .any(|entry| entry.matches(&mapping.group, &mapping.kind, name))
        {
            return Err(LookupError::RestrictedClusterScope {
                group: mapping.group.clone(),
                kind: mapping.kind.clone(),
                name: name.to_string(),
            });
        }
        Ok(Some((mapping, String::new())))
    }

    fn discover(&self, api_version: &str, kind: &str) -> Result<ResourceMapping, LookupError> {
        match &self.backend {
            Backend::Direct { store, .. } => self.discovery.resolve(store.as_ref(), api_version, kind),
            Backend::Watched { watcher, .. } => {
                self.discovery.resolve(watcher.as_ref(), api_version, kind)
            }
        }
    }

    fn get(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
    ) -> Result<Value, LookupError> {
        let result = match &self.backend {
            Backend::Direct { store, cache } => {
                let key = (
                    mapping.api_version(),
                    mapping.kind.clone(),
                    namespace.to_string(),
                    name.to_string(),
                );
                CallCache::get_or_fetch(&cache.gets, key, || store.get(mapping, namespace, name))
            }
            Backend::Watched { watcher, id } => watcher.get_watched(id, mapping, namespace, name),
        };

        self.session.record(mapping.object(namespace, name));
        result
    }

    fn list(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, LookupError> {
        let items = match &self.backend {
            Backend::Direct { store, cache } => {
                let key = (
                    mapping.api_version(),
                    mapping.kind.clone(),
                    namespace.to_string(),
                    selector.to_string(),
                );
                CallCache::get_or_fetch(&cache.lists, key, || {
                    store.list(mapping, namespace, selector)
                })?
            }
            Backend::Watched { watcher, id } => {
                watcher.list_watched(id, mapping, namespace, selector)?
            }
        };

        for item in &items {
            let (ns, name) = crate::store::object_key(item);
            self.session.record(mapping.object(ns, name));
        }
        Ok(items)
    }
}

/// Lookup access handed to context transformers.
pub struct LookupHandle<'a> {
    lookup: &'a Lookup,
}

impl<'a> LookupHandle<'a> {
    pub(crate) fn new(lookup: &'a Lookup) -> Self {
        Self { lookup }
    }

    /// Same semantics as the template `lookup` function.
    pub fn lookup(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
        selectors: &[&str],
    ) -> Result<Value, TemplateError> {
        let selectors: Vec<String> = selectors.iter().map(|s| s.to_string()).collect();
        Ok(self
            .lookup
            .lookup("lookup", api_version, kind, namespace, name, &selectors)?)
    }
}
