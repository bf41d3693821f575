//! The layered name → function table installed into the engine.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use minijinja::value::Rest;
use minijinja::{Environment, Value};

use crate::error::{ExecutionError, TemplateError};

use super::functions::fail;

type FunctionImpl = dyn Fn(&[Value]) -> Result<Value, minijinja::Error> + Send + Sync;

/// Utility functions that disclose the process environment. They are
/// denylisted on every call.
pub const ALWAYS_DENYLISTED: [&str; 2] = ["env", "expandenv"];

/// A callable exposed to templates, both as `name(args)` and as a filter
/// where the piped value is the first argument.
///
/// ```rust
/// use mantle::template::{TemplateFunction, Value};
///
/// let shout = TemplateFunction::new(|args: &[Value]| {
///     let s = args.first().and_then(Value::as_str).unwrap_or_default();
///     Ok(Value::from(s.to_uppercase()))
/// });
/// assert_eq!(shout.call(&[Value::from("hi")]).unwrap().as_str(), Some("HI"));
/// ```
#[derive(Clone)]
pub struct TemplateFunction(Arc<FunctionImpl>);

impl TemplateFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, minijinja::Error> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, minijinja::Error> {
        (self.0)(args)
    }

    /// A function that always fails with `error`.
    pub(crate) fn failing(function: &str, error: ExecutionError) -> Self {
        let function = function.to_string();
        let error = TemplateError::Execution(error);
        Self::new(move |_| Err(fail(&function, error.clone())))
    }
}

impl fmt::Debug for TemplateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TemplateFunction(..)")
    }
}

/// Function table assembled in a fixed order, later layers winning:
///
/// 1. built-ins ([`with_builtins`](Self::with_builtins))
/// 2. utility functions not shadowed by a built-in
///    ([`with_utilities`](Self::with_utilities))
/// 3. removal of disabled names ([`without`](Self::without))
/// 4. caller functions ([`with_custom`](Self::with_custom))
/// 5. denylist wrappers ([`with_denylist`](Self::with_denylist))
///
/// Removing a name also removes the engine-native filter, test or global of
/// that name when the table is installed.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, TemplateFunction>,
    removed: Vec<String>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins<I, S>(mut self, builtins: I) -> Self
    where
        I: IntoIterator<Item = (S, TemplateFunction)>,
        S: Into<String>,
    {
        self.functions
            .extend(builtins.into_iter().map(|(name, f)| (name.into(), f)));
        self
    }

    /// Adds utility functions whose names are still free.
    pub fn with_utilities<I, S>(mut self, utilities: I) -> Self
    where
        I: IntoIterator<Item = (S, TemplateFunction)>,
        S: Into<String>,
    {
        for (name, f) in utilities {
            self.functions.entry(name.into()).or_insert(f);
        }
        self
    }

    pub fn without<I, S>(mut self, disabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in disabled {
            let name = name.as_ref();
            self.functions.remove(name);
            self.removed.push(name.to_string());
        }
        self
    }

    pub fn with_custom<'a, I>(mut self, custom: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a TemplateFunction)>,
    {
        for (name, f) in custom {
            self.functions.insert(name.clone(), f.clone());
        }
        self
    }

    /// Replaces each name in [`ALWAYS_DENYLISTED`] and `denylist` with a
    /// function that always fails.
    pub fn with_denylist<I, S>(mut self, denylist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = ALWAYS_DENYLISTED
            .iter()
            .map(|s| s.to_string())
            .chain(denylist.into_iter().map(|s| s.as_ref().to_string()));
        for name in names {
            let f = TemplateFunction::failing(&name, ExecutionError::denylisted(&name));
            self.functions.insert(name, f);
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&TemplateFunction> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Registers every function as both a global function and a filter.
    pub fn install(&self, env: &mut Environment<'_>) {
        for name in &self.removed {
            env.remove_filter(name);
            env.remove_test(name);
            env.remove_global(name);
        }
        for (name, f) in &self.functions {
            let as_function = f.clone();
            env.add_function(name.clone(), move |args: Rest<Value>| {
                as_function.call(&args)
            });
            let as_filter = f.clone();
            env.add_filter(name.clone(), move |args: Rest<Value>| as_filter.call(&args));
        }
    }
}
