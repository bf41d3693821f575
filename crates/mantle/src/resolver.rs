//! The resolver and the `resolve_template` pipeline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mantle_crypto::{
    decrypt_distinct, find_bare_marker, find_tokens, Cipher, CryptoError, PROTECTED_PREFIX,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::batch::QueryBatch;
use crate::config::Config;
use crate::context::validate_context;
use crate::convert::{json_to_yaml_text, yaml_text_to_json};
use crate::detect::has_template;
use crate::error::{CacheError, ExecutionError, ParseError, Result, ValidationError};
use crate::lookup::{Backend, CallCache, Lookup, LookupHandle};
use crate::options::{ContextTransformer, InputFormat, ResolveOptions};
use crate::session::{ObjectIdentifier, ResolutionSession};
use crate::store::{DiscoveryCache, DynamicWatcher, ObjectStore, ResourceMapping};
use crate::template::{builtins, utilities, CallScope, FunctionRegistry, Renderer, Rewriter};

/// Outcome of one resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateResult {
    /// The resolved document.
    pub resolved: Value,
    /// A secret was read or a value was decrypted or protected.
    pub has_sensitive_data: bool,
    /// Every object a lookup touched, found or not, in first-seen order.
    pub referenced_objects: Vec<ObjectIdentifier>,
    /// A lookup named an API resource type that is not installed.
    pub missing_api_resource: bool,
}

impl TemplateResult {
    fn unresolved(resolved: Value) -> Self {
        Self {
            resolved,
            has_sensitive_data: false,
            referenced_objects: Vec::new(),
            missing_api_resource: false,
        }
    }

    /// The resolved document as YAML text.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.resolved).map_err(|e| ParseError::Yaml(e.to_string()))?)
    }

    /// The resolved document as compact JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.resolved).map_err(|e| ParseError::Json(e.to_string()))?)
    }
}

#[derive(Clone)]
enum Store {
    Direct(Arc<dyn ObjectStore>),
    Watched(Arc<dyn DynamicWatcher>),
}

/// Resolves templated manifests against an object store.
///
/// A resolver either reads directly from an [`ObjectStore`], memoizing reads
/// within each call, or runs in caching mode against a [`DynamicWatcher`].
/// In caching mode every lookup registers a watch for the watcher named in
/// [`ResolveOptions`], and each call runs inside a query batch so watches the
/// template no longer uses are dropped.
///
/// ```rust
/// use std::sync::Arc;
/// use mantle::{MemoryCluster, ResolveOptions, Resolver};
///
/// let cluster = Arc::new(MemoryCluster::new().with_config_map("default", "app", [("replicas", "3")]));
/// let resolver = Resolver::builder().with_store(cluster).build().unwrap();
///
/// let raw = "replicas: '{{ fromConfigMap(\"default\", \"app\", \"replicas\") | toInt }}'\n";
/// let result = resolver
///     .resolve_template(raw, &serde_json::json!({}), &ResolveOptions::new())
///     .unwrap();
/// assert_eq!(result.resolved, serde_json::json!({"replicas": 3}));
/// ```
pub struct Resolver {
    config: Config,
    store: Store,
    discovery: Arc<DiscoveryCache>,
    rewriter: Rewriter,
    renderer: Renderer,
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::default()
    }

    /// A non-caching resolver reading from `store`.
    pub fn new(store: Arc<dyn ObjectStore>, config: Config) -> Result<Self> {
        Self::builder().with_store(store).with_config(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns true when lookups go through a watch cache.
    pub fn caching_enabled(&self) -> bool {
        matches!(self.store, Store::Watched(_))
    }

    /// Resolves `raw` against `context`.
    ///
    /// `context` must serialize to a map, or to nothing, whose values are
    /// booleans, numbers, strings, sequences or maps with primitive keys.
    pub fn resolve_template<C>(
        &self,
        raw: &str,
        context: &C,
        options: &ResolveOptions,
    ) -> Result<TemplateResult>
    where
        C: Serialize + ?Sized,
    {
        let cipher = options.encryption().validate()?;
        let backend = self.backend_for(options)?;
        let context = validate_context(context)?;

        let text = match options.input_format() {
            InputFormat::Yaml => raw.to_string(),
            InputFormat::Json => json_to_yaml_text(raw)?,
        };

        let _batch = match (&self.store, options.watcher()) {
            (Store::Watched(watcher), Some(id)) if !options.external_batch() => {
                Some(QueryBatch::start(&**watcher, id)?)
            }
            _ => None,
        };

        let decryption_enabled = cipher.is_some() && options.encryption().decryption_enabled();
        let (start, _) = self.config.delimiters();
        if !has_template(&text, start, decryption_enabled) {
            tracing::debug!("no template expressions, skipping execution");
            return Ok(TemplateResult::unresolved(yaml_text_to_json(&text)?));
        }

        let session = Arc::new(ResolutionSession::new());
        let lookup = Lookup::new(
            backend,
            Arc::clone(&self.discovery),
            options.lookup_namespace().map(str::to_string),
            options.cluster_scoped_allowlist().to_vec(),
            Arc::clone(&session),
        );
        let context = transform_context(&lookup, context, options.context_transformers())?;

        if decryption_enabled {
            reject_bare_marker(&text)?;
        }
        let (text, decrypted) = match &cipher {
            Some(cipher) if decryption_enabled => {
                let decrypted =
                    predecrypt(cipher, &text, options.encryption().decryption_concurrency());
                (self.rewriter.expand_encrypted(&text), decrypted)
            }
            _ => (text, HashMap::new()),
        };
        let text = self.rewriter.rewrite(&text);

        let scope = Arc::new(CallScope {
            lookup,
            cipher,
            encryption_enabled: options.encryption().encryption_enabled(),
            decryption_enabled,
            decrypted,
        });
        let registry = FunctionRegistry::new()
            .with_builtins(builtins(&scope))
            .with_utilities(utilities())
            .without(&self.config.disabled_functions)
            .with_custom(options.custom_functions())
            .with_denylist(options.denylisted_functions());

        let rendered = self.renderer.render(&text, &registry, &context)?;
        let resolved = yaml_text_to_json(&rendered)?;

        let result = TemplateResult {
            resolved,
            has_sensitive_data: session.has_sensitive_data(),
            referenced_objects: session.referenced_objects(),
            missing_api_resource: session.missing_api_resource(),
        };
        tracing::debug!(
            referenced = result.referenced_objects.len(),
            sensitive = result.has_sensitive_data,
            missing_api_resource = result.missing_api_resource,
            "template resolved"
        );
        Ok(result)
    }

    /// Opens a query batch for `watcher` that spans several resolutions made
    /// with [`ResolveOptions::with_external_batch`].
    pub fn start_query_batch(&self, watcher: &ObjectIdentifier) -> Result<()> {
        Ok(self.dynamic_watcher()?.start_query_batch(watcher)?)
    }

    /// Closes the batch opened by [`start_query_batch`](Self::start_query_batch),
    /// dropping the watches it did not use.
    pub fn end_query_batch(&self, watcher: &ObjectIdentifier) -> Result<()> {
        Ok(self.dynamic_watcher()?.end_query_batch(watcher)?)
    }

    /// Drops every watch of `watcher`. A watcher with nothing cached is not
    /// an error.
    pub fn uncache_watcher(&self, watcher: &ObjectIdentifier) -> Result<()> {
        match self.dynamic_watcher()?.remove_watcher(watcher) {
            Ok(()) | Err(CacheError::NoCacheEntry(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn dynamic_watcher(&self) -> std::result::Result<&dyn DynamicWatcher, CacheError> {
        match &self.store {
            Store::Watched(watcher) => Ok(&**watcher),
            Store::Direct(_) => Err(CacheError::CachingDisabled),
        }
    }

    fn backend_for(&self, options: &ResolveOptions) -> Result<Backend> {
        match &self.store {
            Store::Watched(watcher) => {
                let id = options.watcher().ok_or(ValidationError::MissingWatcher)?;
                Ok(Backend::Watched {
                    watcher: Arc::clone(watcher),
                    id: id.clone(),
                })
            }
            Store::Direct(_) if !options.context_transformers().is_empty() => {
                Err(ValidationError::TransformersRequireCaching.into())
            }
            Store::Direct(store) => Ok(Backend::Direct {
                store: Arc::clone(store),
                cache: CallCache::default(),
            }),
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("caching", &self.caching_enabled())
            .field("discovery", &self.discovery)
            .finish_non_exhaustive()
    }
}

/// Runs the transformers in order. Their output is JSON already, so it is
/// only required to be a map; nulls from looked-up objects are kept.
fn transform_context(
    lookup: &Lookup,
    mut context: Map<String, Value>,
    transformers: &[ContextTransformer],
) -> Result<Map<String, Value>> {
    if transformers.is_empty() {
        return Ok(context);
    }
    let handle = LookupHandle::new(lookup);
    for transformer in transformers {
        match transformer(&handle, Value::Object(context))? {
            Value::Object(map) => context = map,
            other => {
                return Err(ValidationError::Transformer(format!(
                    "expected a map, got {}",
                    json_kind(&other)
                ))
                .into())
            }
        }
    }
    Ok(context)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a map",
    }
}

/// Fails on a marker that has no base64 payload after it, reporting the
/// text that follows the marker and its line.
fn reject_bare_marker(text: &str) -> Result<()> {
    let Some(offset) = find_bare_marker(text) else {
        return Ok(());
    };
    let rest = &text[offset + PROTECTED_PREFIX.len()..];
    let payload: String = rest.chars().take_while(|c| !c.is_whitespace()).take(32).collect();
    let line = text[..offset].matches('\n').count() + 1;
    Err(ExecutionError::function_failed("decrypt", CryptoError::InvalidBase64(payload).into())
        .with_line(Some(line))
        .into())
}

/// Decrypts the distinct protected values in `text` ahead of execution.
///
/// On failure nothing is kept; each `decrypt` call then retries and reports
/// its own error with a line number.
fn predecrypt(cipher: &Cipher, text: &str, concurrency: usize) -> HashMap<String, String> {
    let tokens = find_tokens(text);
    if tokens.is_empty() {
        return HashMap::new();
    }
    match decrypt_distinct(cipher, tokens.iter().map(|t| t.payload), concurrency) {
        Ok(decrypted) => decrypted,
        Err(err) => {
            tracing::debug!(error = %err, "pre-decryption failed, deferring to execution");
            HashMap::new()
        }
    }
}

/// Builder for [`Resolver`].
///
/// ```rust
/// use std::sync::Arc;
/// use mantle::{Config, MemoryCluster, Resolver};
///
/// let watcher = Arc::new(MemoryCluster::new());
/// let resolver = Resolver::builder()
///     .with_watcher(watcher)
///     .with_config(Config::hub())
///     .build()
///     .unwrap();
/// assert!(resolver.caching_enabled());
/// ```
#[derive(Default)]
pub struct ResolverBuilder {
    config: Config,
    store: Option<Store>,
    mappings: Option<Vec<ResourceMapping>>,
}

impl ResolverBuilder {
    /// Reads directly from `store`.
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(Store::Direct(store));
        self
    }

    /// Enables caching mode: reads go through `watcher` and register watches.
    pub fn with_watcher(mut self, watcher: Arc<dyn DynamicWatcher>) -> Self {
        self.store = Some(Store::Watched(watcher));
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Uses a fixed set of resource mappings instead of discovery.
    pub fn with_resource_mappings(mut self, mappings: impl IntoIterator<Item = ResourceMapping>) -> Self {
        self.mappings
            .get_or_insert_with(Vec::new)
            .extend(mappings);
        self
    }

    pub fn build(self) -> Result<Resolver> {
        self.config.validate()?;
        let store = self.store.ok_or_else(|| {
            ValidationError::Config("an object store or a watcher is required".to_string())
        })?;
        let discovery = match self.mappings {
            Some(mappings) => DiscoveryCache::with_mappings(mappings),
            None => DiscoveryCache::new(self.config.missing_api_resource_cache_ttl),
        };
        let rewriter = Rewriter::new(&self.config)?;
        let renderer = Renderer::new(&self.config)?;

        let (start, stop) = self.config.delimiters();
        tracing::debug!(
            caching = matches!(store, Store::Watched(_)),
            start,
            stop,
            "resolver built"
        );
        Ok(Resolver {
            config: self.config,
            store,
            discovery: Arc::new(discovery),
            rewriter,
            renderer,
        })
    }
}

impl fmt::Debug for ResolverBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverBuilder")
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("mappings", &self.mappings)
            .finish()
    }
}
