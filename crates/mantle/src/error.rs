//! Error types for template resolution.
//!
//! [`TemplateError`] is the error returned by every resolver entry point. It
//! wraps one error enum per concern so callers can match on the failure class
//! (parsing, execution, validation, lookups, cryptography, caching) and still
//! reach the typed cause of a function that failed mid-template.

use std::fmt;

pub use mantle_crypto::CryptoError;

/// Top-level error for resolution calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    /// Malformed structured input or output, or a template syntax error.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A template function failed, or an unknown/denylisted one was called.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Bad configuration, options or context shape.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A resource lookup failed.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// Key material or a protected value was invalid.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The watch cache refused an operation.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl TemplateError {
    /// Returns the lookup error behind this error, including one raised by a
    /// template function during execution.
    pub fn lookup_error(&self) -> Option<&LookupError> {
        match self {
            TemplateError::Lookup(err) => Some(err),
            TemplateError::Execution(err) => err.cause().and_then(TemplateError::lookup_error),
            _ => None,
        }
    }

    /// Returns the crypto error behind this error, including one raised by a
    /// template function during execution.
    pub fn crypto_error(&self) -> Option<&CryptoError> {
        match self {
            TemplateError::Crypto(err) => Some(err),
            TemplateError::Execution(err) => err.cause().and_then(TemplateError::crypto_error),
            _ => None,
        }
    }
}

/// Errors parsing structured text or template syntax.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The raw input is not valid JSON.
    #[error("failed to convert the JSON input to YAML: {0}")]
    Json(String),

    /// The executed template is not valid YAML.
    #[error("the resolved template is not valid YAML: {0}")]
    Yaml(String),

    /// The template could not be compiled.
    #[error("failed to parse the template{}: {message}", line_suffix(.line))]
    Syntax { line: Option<usize>, message: String },
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(" at line {}", l)).unwrap_or_default()
}

/// The class of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    /// The template called a function or filter that does not exist.
    UndefinedFunction,
    /// The template called a function denylisted for this call.
    Denylisted,
    /// The function exists but is unavailable with the current settings.
    NotEnabled,
    /// A registered function returned an error.
    FunctionFailed,
    /// Any other engine failure during rendering.
    Engine,
}

/// A failure while executing a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionError {
    kind: ExecutionErrorKind,
    function: Option<String>,
    line: Option<usize>,
    detail: String,
    cause: Option<Box<TemplateError>>,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            function: None,
            line: None,
            detail: detail.into(),
            cause: None,
        }
    }

    /// Error for a call to a function that is not registered.
    pub fn undefined_function(function: impl Into<String>) -> Self {
        let function = function.into();
        Self::new(
            ExecutionErrorKind::UndefinedFunction,
            format!("function {:?} not defined", function),
        )
        .with_function(function)
    }

    /// Error for a call to a denylisted function.
    pub fn denylisted(function: impl Into<String>) -> Self {
        let function = function.into();
        Self::new(
            ExecutionErrorKind::Denylisted,
            format!(
                "the function {:?} is disabled for this template for security reasons",
                function
            ),
        )
        .with_function(function)
    }

    /// Error for a function unavailable in the current mode.
    pub fn not_enabled(function: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::NotEnabled, detail).with_function(function)
    }

    /// Error for a function that failed with a typed cause.
    pub fn function_failed(function: impl Into<String>, cause: TemplateError) -> Self {
        Self {
            kind: ExecutionErrorKind::FunctionFailed,
            function: Some(function.into()),
            line: None,
            detail: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn with_line(mut self, line: Option<usize>) -> Self {
        if self.line.is_none() {
            self.line = line;
        }
        self
    }

    pub fn kind(&self) -> ExecutionErrorKind {
        self.kind
    }

    /// Name of the offending function, when known.
    pub fn function(&self) -> Option<&str> {
        self.function.as_deref()
    }

    /// Template line where execution failed, when known.
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// The typed error a failing function returned.
    pub fn cause(&self) -> Option<&TemplateError> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to resolve the template")?;
        if let Some(line) = self.line {
            write!(f, " at line {}", line)?;
        }
        match (&self.function, self.kind) {
            (Some(function), ExecutionErrorKind::FunctionFailed) => {
                write!(f, ": error calling {}: {}", function, self.detail)
            }
            _ => write!(f, ": {}", self.detail),
        }
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as _)
    }
}

/// Invalid configuration, options or context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Only one of the two delimiters was configured.
    #[error("the configured start and stop delimiters must both be set or both be empty")]
    DelimiterPairing,

    /// The configuration file could not be read or parsed.
    #[error("invalid resolver configuration: {0}")]
    Config(String),

    /// Caching mode was used without identifying the watcher.
    #[error("the watcher must be set when the resolver has caching enabled")]
    MissingWatcher,

    /// Context transformers were supplied without caching.
    #[error("context transformers are only supported when the resolver has caching enabled")]
    TransformersRequireCaching,

    /// The context contains a value kind that templates cannot consume.
    #[error(
        "the input context must contain only booleans, numbers, strings, sequences and maps \
         with primitive keys, found {0}"
    )]
    InvalidContext(String),

    /// A context transformer rejected the context.
    #[error("the context transformer failed: {0}")]
    Transformer(String),
}

/// Errors resolving resource references.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// The requested object does not exist.
    #[error("{kind} {namespace}/{name} was not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The API resource type itself is not installed.
    #[error("the API resource {kind} in {api_version} was not found")]
    MissingApiResource { api_version: String, kind: String },

    /// A namespaced lookup targeted a namespace other than the permitted one.
    #[error(
        "the namespace argument passed to {function} is restricted to {allowed}, got {namespace}"
    )]
    RestrictedNamespace {
        function: String,
        namespace: String,
        allowed: String,
    },

    /// A cluster-scoped lookup was not covered by the allowlist.
    #[error(
        "lookups of cluster-scoped resources are not permitted for group {group:?}, \
         kind {kind:?}, name {name:?}"
    )]
    RestrictedClusterScope {
        group: String,
        kind: String,
        name: String,
    },

    /// A label selector argument could not be parsed.
    #[error("invalid label selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// A template function received an argument of the wrong shape.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The object store failed for another reason.
    #[error("the object store failed: {0}")]
    Backend(String),
}

impl LookupError {
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn missing_api_resource(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::MissingApiResource {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::NotFound { .. })
    }

    pub fn is_missing_api_resource(&self) -> bool {
        matches!(self, LookupError::MissingApiResource { .. })
    }
}

/// Errors from the watch cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// A caching-only operation was used on a non-caching resolver.
    #[error("this operation requires the resolver to have caching enabled")]
    CachingDisabled,

    /// The watcher has nothing cached.
    #[error("no cache entry exists for watcher {0}")]
    NoCacheEntry(String),

    /// A query batch is already open for the watcher.
    #[error("a query batch is already in progress for watcher {0}")]
    BatchInProgress(String),

    /// No query batch is open for the watcher.
    #[error("no query batch is in progress for watcher {0}")]
    BatchNotStarted(String),
}

/// Carrier attached to engine errors so the typed cause survives rendering.
#[derive(Debug, thiserror::Error)]
#[error("{function}: {cause}")]
pub(crate) struct FunctionFailure {
    pub(crate) function: String,
    #[source]
    pub(crate) cause: TemplateError,
}

/// Result type for resolution operations.
pub type Result<T> = std::result::Result<T, TemplateError>;
