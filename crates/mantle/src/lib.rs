//! # Mantle - Template Resolution for Policy Manifests
//!
//! Mantle resolves templated YAML or JSON manifests into concrete documents.
//! Expressions look up cluster objects, read secrets and config maps, coerce
//! values to typed YAML scalars and expand protected values.
//!
//! ```yaml
//! apiVersion: v1
//! kind: ConfigMap
//! data:
//!   replicas: '{{ fromConfigMap("default", "app", "replicas") | toInt }}'
//!   password: '{{ fromSecret("default", "db", "password") }}'
//! ```
//!
//! ## Components
//!
//! - [`Resolver`]: the entry point; one per store and [`Config`]
//! - [`ResolveOptions`]: per-call settings (namespace restriction, allowlist,
//!   custom and denylisted functions, encryption, caching identity)
//! - [`TemplateResult`]: the resolved document plus what the call touched
//! - [`store`]: the traits a cluster backend implements, and [`MemoryCluster`]
//! - [`template`]: the function registry and built-in functions
//!
//! ## Resolution
//!
//! A call validates its options and context, converts JSON input to YAML,
//! skips documents without expressions, expands protected values, rewrites
//! typed expressions (`toInt`, `toBool`, `toLiteral`, `copySecretData`,
//! `copyConfigMapData`, `autoindent`), executes the template and parses the
//! output back into a structured document.
//!
//! In caching mode ([`ResolverBuilder::with_watcher`]) every lookup becomes a
//! watch owned by the watcher named in the options, and each call runs inside
//! a query batch so watches that are no longer used are released.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mantle::{MemoryCluster, ResolveOptions, Resolver};
//! use serde_json::json;
//!
//! let cluster = Arc::new(MemoryCluster::new().with_secret("default", "db", [("password", "hunter2")]));
//! let resolver = Resolver::builder().with_store(cluster).build().unwrap();
//!
//! let raw = "password: '{{ fromSecret(\"default\", \"db\", \"password\") }}'\nowner: '{{ team }}'\n";
//! let result = resolver
//!     .resolve_template(raw, &json!({"team": "platform"}), &ResolveOptions::new())
//!     .unwrap();
//!
//! assert_eq!(result.resolved, json!({"password": "aHVudGVyMg==", "owner": "platform"}));
//! assert!(result.has_sensitive_data);
//! ```

mod batch;
pub mod config;
pub mod context;
mod convert;
pub mod detect;
pub mod error;
pub mod lookup;
pub mod options;
mod resolver;
pub mod session;
pub mod store;
pub mod template;

pub use config::{Config, DEFAULT_START_DELIM, DEFAULT_STOP_DELIM, HUB_START_DELIM, HUB_STOP_DELIM};
pub use context::validate_context;
pub use detect::{has_template, uses_encryption};
pub use error::{
    CacheError, CryptoError, ExecutionError, ExecutionErrorKind, LookupError, ParseError, Result,
    TemplateError, ValidationError,
};
pub use mantle_crypto::EncryptionConfig;
pub use options::{ClusterScopedObjectIdentifier, ContextTransformer, InputFormat, ResolveOptions};
pub use resolver::{Resolver, ResolverBuilder, TemplateResult};
pub use session::ObjectIdentifier;
pub use store::{DynamicWatcher, MemoryCluster, ObjectStore, ResourceDiscovery, ResourceMapping};
pub use template::{FunctionRegistry, TemplateFunction};
