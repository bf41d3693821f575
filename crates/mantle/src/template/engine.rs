//! Compiling and executing a rewritten template.

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde_json::{Map, Value};

use super::registry::FunctionRegistry;
use crate::config::Config;
use crate::error::{
    ExecutionError, ExecutionErrorKind, FunctionFailure, ParseError, TemplateError,
    ValidationError,
};

/// Engine settings derived from a resolver configuration.
#[derive(Debug, Clone)]
pub(crate) struct Renderer {
    syntax: SyntaxConfig,
}

impl Renderer {
    pub(crate) fn new(config: &Config) -> Result<Self, ValidationError> {
        let (start, stop) = config.delimiters();
        Ok(Self {
            syntax: syntax_for(start, stop)?,
        })
    }

    /// Compiles `source` and renders it against `context`.
    pub(crate) fn render(
        &self,
        source: &str,
        registry: &FunctionRegistry,
        context: &Map<String, Value>,
    ) -> Result<String, TemplateError> {
        let mut env = Environment::new();
        env.set_syntax(self.syntax.clone());
        env.set_keep_trailing_newline(true);
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        registry.install(&mut env);

        let template = env.template_from_str(source).map_err(syntax_error)?;
        tracing::debug!("template compiled");
        template.render(context).map_err(execution_error)
    }
}

/// Expression delimiters as configured; block and comment delimiters
/// derived from them.
pub(crate) fn syntax_for(start: &str, stop: &str) -> Result<SyntaxConfig, ValidationError> {
    SyntaxConfig::builder()
        .variable_delimiters(start.to_string(), stop.to_string())
        .block_delimiters(open_marker(start, '%'), close_marker(stop, '%'))
        .comment_delimiters(open_marker(start, '#'), close_marker(stop, '#'))
        .build()
        .map_err(|e| ValidationError::Config(format!("unusable delimiters {start:?} {stop:?}: {e}")))
}

pub(crate) fn open_marker(start: &str, marker: char) -> String {
    if start.contains("{{") {
        start.replacen("{{", &format!("{{{}", marker), 1)
    } else {
        format!("{}{}", start, marker)
    }
}

pub(crate) fn close_marker(stop: &str, marker: char) -> String {
    if stop.contains("}}") {
        stop.replacen("}}", &format!("{}}}", marker), 1)
    } else {
        format!("{}{}", marker, stop)
    }
}

fn syntax_error(err: minijinja::Error) -> TemplateError {
    ParseError::Syntax {
        line: err.line(),
        message: err.detail().map_or_else(|| err.kind().to_string(), str::to_string),
    }
    .into()
}

fn failure_of(err: &minijinja::Error) -> Option<&FunctionFailure> {
    let mut source = std::error::Error::source(err);
    while let Some(current) = source {
        if let Some(failure) = current.downcast_ref::<FunctionFailure>() {
            return Some(failure);
        }
        source = current.source();
    }
    None
}

fn execution_error(err: minijinja::Error) -> TemplateError {
    let line = err.line();
    if let Some(failure) = failure_of(&err) {
        let error = match &failure.cause {
            TemplateError::Execution(inner) => inner.clone(),
            cause => ExecutionError::function_failed(&failure.function, cause.clone()),
        };
        return error.with_line(line).into();
    }

    let detail = err.detail().map_or_else(|| err.kind().to_string(), str::to_string);
    let error = match err.kind() {
        ErrorKind::UnknownFunction | ErrorKind::UnknownFilter => {
            ExecutionError::undefined_function(unknown_name(&detail))
        }
        _ => ExecutionError::new(ExecutionErrorKind::Engine, detail),
    };
    error.with_line(line).into()
}

fn unknown_name(detail: &str) -> &str {
    let name = detail.strip_suffix(" is unknown").unwrap_or(detail);
    name.strip_prefix("filter ").unwrap_or(name)
}
