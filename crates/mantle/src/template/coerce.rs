//! Text rewrites applied to the raw template before it is compiled.
//!
//! The engine knows nothing about YAML, so a few constructs are adjusted in
//! the source text:
//!
//! - quotes around expressions that produce typed values are removed, so
//!   `key: '{{ "6" | toInt }}'` yields the integer `6`
//! - `| autoindent` becomes `| indent(N)` with `N` taken from the column the
//!   expression starts at
//! - encrypted markers become `decrypt("...")` calls
//! - block and comment openers that do not start a tag, such as the `{#` in
//!   `${#arr[@]}`, are printed by an expression instead of being parsed
//! - hub expressions are shielded from the managed pass
//!
//! The rewrites are line-oriented regular expressions and keep their known
//! quirks: a quoted expression sharing a line with an earlier expression is
//! matched from the first start delimiter on that line.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::engine::{close_marker, open_marker};
use crate::config::Config;
use crate::error::ValidationError;

/// Statements a block tag may open with.
const STATEMENTS: &str = "for|endfor|if|elif|else|endif|set|endset|with|endwith|block|endblock|\
extends|include|import|from|macro|endmacro|call|endcall|filter|endfilter|autoescape|endautoescape|\
raw|endraw|do|continue|break";

static HUB_EXPRESSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{\{hub.*?hub\}\}").unwrap());

/// Compiled rewrites for one delimiter pair.
#[derive(Debug, Clone)]
pub(crate) struct Rewriter {
    start: String,
    stop: String,
    additional_indentation: usize,
    hub_escape: bool,
    typed_quotes: Regex,
    autoindent: Regex,
    stray_markers: Regex,
}

impl Rewriter {
    pub(crate) fn new(config: &Config) -> Result<Self, ValidationError> {
        let (start, stop) = config.delimiters();
        let (s, e) = (regex::escape(start), regex::escape(stop));
        let invalid = |err: regex::Error| ValidationError::Config(err.to_string());

        let typed_quotes = Regex::new(&format!(
            r#"(?P<lead>(?::|-)\s+)(?:[|>][-+]?\s+)?(?:['"]\s*)?(?P<expr>{s}-?\s*(?:copySecretData|copyConfigMapData)\s*\(.*?\)\s*-?{e}|{s}.*?\|\s*(?:toInt|toBool|toLiteral)\s*-?{e})(?:\s*['"])?"#
        ))
        .map_err(invalid)?;
        let autoindent = Regex::new(&format!(r#"( *)(?:'|")?({s}.*\| *autoindent *{e})"#))
            .map_err(invalid)?;
        let stray_markers = Regex::new(&format!(
            r"(?s:{s}.*?{e})|(?P<block>{bo})(?P<statement>[-+]?\s*(?:{STATEMENTS})\b)?|(?P<comment>{co})(?P<closed>[^\n]*?{ce})?",
            bo = regex::escape(&open_marker(start, '%')),
            co = regex::escape(&open_marker(start, '#')),
            ce = regex::escape(&close_marker(stop, '#')),
        ))
        .map_err(invalid)?;

        Ok(Self {
            start: start.to_string(),
            stop: stop.to_string(),
            additional_indentation: config.additional_indentation as usize,
            hub_escape: config.uses_default_delimiters(),
            typed_quotes,
            autoindent,
            stray_markers,
        })
    }

    /// Rewrites every `$ocm_encrypted:` token into a `decrypt` call.
    pub(crate) fn expand_encrypted(&self, text: &str) -> String {
        mantle_crypto::replace_tokens(text, |payload| {
            format!("{} decrypt(\"{}\") {}", self.start, payload, self.stop)
        })
    }

    /// Applies quote stripping, autoindent expansion and marker shielding.
    pub(crate) fn rewrite(&self, text: &str) -> String {
        let text = self.strip_typed_quotes(text);
        let text = self.expand_autoindent(&text);
        let text = self.shield_stray_markers(&text);
        if self.hub_escape {
            shield_hub_expressions(&text)
        } else {
            text
        }
    }

    pub(crate) fn strip_typed_quotes(&self, text: &str) -> String {
        let out = self.typed_quotes.replace_all(text, "${lead}${expr}");
        if out != text {
            tracing::debug!("removed quotes around typed template expressions");
        }
        out.into_owned()
    }

    pub(crate) fn expand_autoindent(&self, text: &str) -> String {
        self.autoindent
            .replace_all(text, |caps: &Captures<'_>| {
                let leading = &caps[1];
                let spaces = leading.len().saturating_sub(self.additional_indentation);
                let expr = caps[2].replacen("autoindent", &format!("indent({})", spaces), 1);
                tracing::trace!(spaces, "expanded autoindent");
                format!("{}{}", leading, expr)
            })
            .into_owned()
    }

    /// Replaces block and comment openers outside expressions that do not
    /// start a tag with an expression printing the opener.
    ///
    /// A block opener starts a tag when a statement keyword follows it. A
    /// comment opener starts a comment when the comment closes on the same
    /// line.
    pub(crate) fn shield_stray_markers(&self, text: &str) -> String {
        self.stray_markers
            .replace_all(text, |caps: &Captures<'_>| {
                let stray = match (caps.name("block"), caps.name("comment")) {
                    (Some(m), _) if caps.name("statement").is_none() => Some(m.as_str()),
                    (_, Some(m)) if caps.name("closed").is_none() => Some(m.as_str()),
                    _ => None,
                };
                match stray {
                    Some(marker) => {
                        tracing::trace!(marker, "shielded literal marker");
                        format!("{} {} {}", self.start, serde_json::Value::from(marker), self.stop)
                    }
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Wraps each `{{hub ... hub}}` span in a raw block.
pub(crate) fn shield_hub_expressions(text: &str) -> String {
    HUB_EXPRESSION
        .replace_all(text, "{% raw %}${0}{% endraw %}")
        .into_owned()
}
