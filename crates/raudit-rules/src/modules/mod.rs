//! Built-in modules: the static registration table consulted before any
//! loader hook.
//!
//! - `default` — unit comparison test (`field : type [op] value`); this
//!   is the module a bare test resolves to when no `%name` is given.
//! - `constant` — fixed `true`/`false` test.
//! - `regex` — pattern test over a unit's canonical rendering.
//! - `log` — action appending wire records to a file or stderr.
//! - `reply` — action setting a unit on the reply event.

use crate::error::{Result, RuleError};
use crate::module::Module;
use crate::token::{Token, Tokenizer};

mod constant;
mod default;
mod logger;
mod pattern;
mod reply;

/// Resolve a built-in module by name.
pub fn builtin(name: &str) -> Option<Module> {
    match name {
        "default" => Some(default::module()),
        "constant" => Some(constant::module()),
        "regex" => Some(pattern::module()),
        "log" => Some(logger::module()),
        "reply" => Some(reply::module()),
        _ => None,
    }
}

/// Names of all built-in modules, for diagnostics.
pub fn builtin_names() -> &'static [&'static str] {
    &["constant", "default", "log", "regex", "reply"]
}

// ---------------------------------------------------------------------------
// Argument helpers shared by the built-ins
// ---------------------------------------------------------------------------

/// Consume a word or quoted string.
fn expect_text(tokens: &mut Tokenizer, what: &str) -> Result<Token> {
    let line = tokens.line();
    match tokens.get() {
        Some(token) if token.is_text() => Ok(token),
        Some(token) => Err(RuleError::usage(
            token.line,
            format!("expected {what}, found '{token}'"),
        )),
        None => Err(RuleError::usage(line, format!("expected {what}, found end of input"))),
    }
}

/// Consume a specific key character.
fn expect_key(tokens: &mut Tokenizer, ch: char, what: &str) -> Result<()> {
    let line = tokens.line();
    match tokens.get() {
        Some(token) if token.is_key(ch) => Ok(()),
        Some(token) => Err(RuleError::usage(
            token.line,
            format!("expected '{ch}' {what}, found '{token}'"),
        )),
        None => Err(RuleError::usage(
            line,
            format!("expected '{ch}' {what}, found end of input"),
        )),
    }
}
