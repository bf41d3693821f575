//! Cached resource discovery.

use std::collections::HashMap;
use std::time::Duration;

use moka::sync::Cache;

use super::{ResourceDiscovery, ResourceMapping};
use crate::error::LookupError;

type DiscoveryKey = (String, String);

/// Resolver-wide cache in front of [`ResourceDiscovery`].
///
/// Found mappings are kept for the life of the resolver. Missing resource
/// types are remembered for the configured TTL so a template that references
/// an uninstalled type does not trigger discovery on every call; a zero TTL
/// disables that negative cache.
///
/// When a fixed list of mappings is supplied it is authoritative: discovery
/// is never consulted and anything not in the list is missing.
pub struct DiscoveryCache {
    preset: Option<HashMap<DiscoveryKey, ResourceMapping>>,
    found: Cache<DiscoveryKey, ResourceMapping>,
    missing: Option<Cache<DiscoveryKey, ()>>,
}

impl DiscoveryCache {
    pub fn new(missing_ttl: Duration) -> Self {
        let missing = (!missing_ttl.is_zero())
            .then(|| Cache::builder().time_to_live(missing_ttl).build());
        Self {
            preset: None,
            found: Cache::builder().build(),
            missing,
        }
    }

    /// A cache answering only from `mappings`.
    pub fn with_mappings(mappings: impl IntoIterator<Item = ResourceMapping>) -> Self {
        let preset = mappings
            .into_iter()
            .map(|m| ((m.api_version(), m.kind.clone()), m))
            .collect();
        Self {
            preset: Some(preset),
            ..Self::new(Duration::ZERO)
        }
    }

    /// Resolves a kind, consulting `discovery` on a cache miss.
    pub fn resolve<D>(
        &self,
        discovery: &D,
        api_version: &str,
        kind: &str,
    ) -> Result<ResourceMapping, LookupError>
    where
        D: ResourceDiscovery + ?Sized,
    {
        let key = (api_version.to_string(), kind.to_string());

        if let Some(preset) = &self.preset {
            return preset
                .get(&key)
                .cloned()
                .ok_or_else(|| LookupError::missing_api_resource(api_version, kind));
        }

        if let Some(mapping) = self.found.get(&key) {
            return Ok(mapping);
        }
        if let Some(missing) = &self.missing {
            if missing.contains_key(&key) {
                tracing::trace!(api_version, kind, "API resource known to be missing");
                return Err(LookupError::missing_api_resource(api_version, kind));
            }
        }

        tracing::debug!(api_version, kind, "discovering API resource");
        match discovery.resolve_kind(api_version, kind) {
            Ok(mapping) => {
                self.found.insert(key, mapping.clone());
                Ok(mapping)
            }
            Err(err) => {
                if err.is_missing_api_resource() {
                    if let Some(missing) = &self.missing {
                        missing.insert(key, ());
                    }
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for DiscoveryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryCache")
            .field("preset", &self.preset.as_ref().map(HashMap::len))
            .field("found", &self.found.entry_count())
            .field("negative_cache", &self.missing.is_some())
            .finish()
    }
}
