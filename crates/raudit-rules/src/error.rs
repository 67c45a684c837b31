//! Engine error types, mirroring the error taxonomy the daemon reports:
//! usage (caller misuse), system (OS failure), protocol (bad peer data),
//! unhandled (recognized but unimplemented), internal (should not happen).

use thiserror::Error;

/// Errors raised while building or driving a rule chain.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Malformed rule text or arguments. Aborts the whole parse.
    #[error("usage error near line {line}: {reason}")]
    Usage { line: u32, reason: String },

    /// An OS-level failure (opening a module's log sink, reading rules).
    #[error("system error: {0}")]
    System(#[from] std::io::Error),

    /// A peer-supplied record violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] raudit_proto::ProtoError),

    /// A recognized condition this build does not implement.
    #[error("unhandled condition: {0}")]
    Unhandled(String),

    /// A should-not-happen condition (resolver miss, state corruption).
    #[error("internal error: {0}")]
    Internal(String),

    /// A module supplied only part of a capability's lifecycle hooks.
    #[error("module '{module}': {group} hooks must be all present or all absent")]
    Broken { module: String, group: String },

    /// A module with no capability at all.
    #[error("module '{0}' provides no capability")]
    Useless(String),
}

impl RuleError {
    /// Shorthand for usage errors.
    pub fn usage(line: u32, reason: impl Into<String>) -> RuleError {
        RuleError::Usage {
            line,
            reason: reason.into(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RuleError>;
