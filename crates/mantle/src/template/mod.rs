//! Template functions and the engine glue.
//!
//! Templates use Jinja syntax (rendered by MiniJinja). Every function in the
//! [`FunctionRegistry`] can be called directly or used as a filter, with the
//! piped value as the first argument:
//!
//! ```text
//! password: '{{ fromSecret("default", "db", "password") }}'
//! replicas: '{{ settings.replicas | toInt }}'
//! config: |
//!   {{ fromConfigMap("default", "app", "config.yaml") | autoindent }}
//! ```
//!
//! # Built-ins
//!
//! | function | result |
//! |----------|--------|
//! | `lookup(apiVersion, kind, namespace, name, selectors...)` | object, list or `{}` |
//! | `fromSecret(namespace, name, key)` | base64 value of a secret key |
//! | `fromConfigMap(namespace, name, key)` | value of a config map key |
//! | `fromClusterClaim(name)` | `spec.value` of a cluster claim |
//! | `copySecretData(namespace, name)` | JSON of a secret's `data` |
//! | `copyConfigMapData(namespace, name)` | JSON of a config map's `data` |
//! | `getNodesWithExactRoles(roles...)` | node list whose roles equal the set |
//! | `hasNodesWithExactRoles(roles...)` | whether such nodes exist |
//! | `base64enc`, `base64dec` | standard base64 |
//! | `toInt`, `atoi`, `toBool`, `toLiteral` | typed values |
//! | `indent(value, n)`, `autoindent` | indentation of multi-line values |
//! | `protect(value)` | encrypted value when encryption is enabled |
//! | `decrypt(payload)` | plaintext when decryption is enabled |
//!
//! A utility layer adds string, collection and date helpers such as
//! `trimPrefix`, `splitList`, `ternary`, `toJson`, `sha256sum` and `date`.

mod coerce;
mod engine;
pub(crate) mod functions;
mod registry;
mod utility;

pub use minijinja::Value;
pub use registry::{FunctionRegistry, TemplateFunction, ALWAYS_DENYLISTED};

pub(crate) use coerce::Rewriter;
pub(crate) use engine::Renderer;
pub(crate) use functions::{builtins, CallScope};
pub(crate) use utility::utilities;
