//! Per-call resolution options.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use mantle_crypto::EncryptionConfig;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::lookup::LookupHandle;
use crate::session::ObjectIdentifier;
use crate::template::TemplateFunction;

/// Format of the raw template handed to the resolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    #[default]
    Yaml,
    /// Converted to YAML before any rewriting.
    Json,
}

/// Permits a cluster-scoped lookup while a namespace restriction is active.
///
/// Each field is either an exact value or `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterScopedObjectIdentifier {
    pub group: String,
    pub kind: String,
    pub name: String,
}

impl ClusterScopedObjectIdentifier {
    pub fn new(group: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Returns true if every field is `*` or equal to the requested one.
    pub fn matches(&self, group: &str, kind: &str, name: &str) -> bool {
        let field = |allowed: &str, requested: &str| allowed == "*" || allowed == requested;
        field(&self.group, group) && field(&self.kind, kind) && field(&self.name, name)
    }
}

/// Rewrites the validated context before execution.
///
/// Transformers run in caching mode only. Lookups made through the handle
/// are recorded and watched like template lookups. Each transformer must
/// return a map; its values are not re-validated, so looked-up objects may
/// carry null fields.
pub type ContextTransformer = Arc<
    dyn Fn(&LookupHandle<'_>, serde_json::Value) -> Result<serde_json::Value, TemplateError>
        + Send
        + Sync,
>;

/// Options for one resolution call.
///
/// ```rust
/// use mantle::{ClusterScopedObjectIdentifier, InputFormat, ResolveOptions};
///
/// let options = ResolveOptions::new()
///     .with_input_format(InputFormat::Json)
///     .with_lookup_namespace("policies")
///     .with_cluster_scoped_allowlist([ClusterScopedObjectIdentifier::new("", "Node", "*")])
///     .with_denylisted_functions(["lookup"]);
/// assert_eq!(options.lookup_namespace(), Some("policies"));
/// ```
#[derive(Clone, Default)]
pub struct ResolveOptions {
    context_transformers: Vec<ContextTransformer>,
    cluster_scoped_allowlist: Vec<ClusterScopedObjectIdentifier>,
    custom_functions: BTreeMap<String, TemplateFunction>,
    denylisted_functions: Vec<String>,
    encryption: EncryptionConfig,
    input_format: InputFormat,
    lookup_namespace: Option<String>,
    watcher: Option<ObjectIdentifier>,
    external_batch: bool,
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context_transformer<F>(mut self, transformer: F) -> Self
    where
        F: Fn(&LookupHandle<'_>, serde_json::Value) -> Result<serde_json::Value, TemplateError>
            + Send
            + Sync
            + 'static,
    {
        self.context_transformers.push(Arc::new(transformer));
        self
    }

    pub fn with_cluster_scoped_allowlist(
        mut self,
        entries: impl IntoIterator<Item = ClusterScopedObjectIdentifier>,
    ) -> Self {
        self.cluster_scoped_allowlist.extend(entries);
        self
    }

    /// Adds a function that overrides any built-in of the same name.
    pub fn with_custom_function(mut self, name: impl Into<String>, function: TemplateFunction) -> Self {
        self.custom_functions.insert(name.into(), function);
        self
    }

    /// Makes the named functions fail when called.
    pub fn with_denylisted_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denylisted_functions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn with_input_format(mut self, format: InputFormat) -> Self {
        self.input_format = format;
        self
    }

    /// Restricts namespaced lookups to `namespace`.
    pub fn with_lookup_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.lookup_namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    /// Identifies the object on whose behalf lookups are watched.
    pub fn with_watcher(mut self, watcher: ObjectIdentifier) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// The caller opens and closes query batches itself.
    pub fn with_external_batch(mut self, external: bool) -> Self {
        self.external_batch = external;
        self
    }

    pub fn context_transformers(&self) -> &[ContextTransformer] {
        &self.context_transformers
    }

    pub fn cluster_scoped_allowlist(&self) -> &[ClusterScopedObjectIdentifier] {
        &self.cluster_scoped_allowlist
    }

    pub fn custom_functions(&self) -> &BTreeMap<String, TemplateFunction> {
        &self.custom_functions
    }

    pub fn denylisted_functions(&self) -> &[String] {
        &self.denylisted_functions
    }

    pub fn encryption(&self) -> &EncryptionConfig {
        &self.encryption
    }

    pub fn input_format(&self) -> InputFormat {
        self.input_format
    }

    pub fn lookup_namespace(&self) -> Option<&str> {
        self.lookup_namespace.as_deref()
    }

    pub fn watcher(&self) -> Option<&ObjectIdentifier> {
        self.watcher.as_ref()
    }

    pub fn external_batch(&self) -> bool {
        self.external_batch
    }
}

impl fmt::Debug for ResolveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("context_transformers", &self.context_transformers.len())
            .field("cluster_scoped_allowlist", &self.cluster_scoped_allowlist)
            .field("custom_functions", &self.custom_functions.keys().collect::<Vec<_>>())
            .field("denylisted_functions", &self.denylisted_functions)
            .field("encryption", &self.encryption)
            .field("input_format", &self.input_format)
            .field("lookup_namespace", &self.lookup_namespace)
            .field("watcher", &self.watcher)
            .field("external_batch", &self.external_batch)
            .finish()
    }
}
