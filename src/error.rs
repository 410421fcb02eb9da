//! Error types for the rule engine.
//!
//! A single `thiserror`-derived enum covering predicate declaration, rule
//! compilation, and tick execution: short `#[error(...)]` messages,
//! `#[from]` only where a lower layer's error naturally converts.

use std::fmt;
use thiserror::Error;

use crate::value::DataType;

/// Errors raised while declaring predicates, compiling rules, or executing a tick.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A goal received an unbound variable where a bound value was required,
    /// or an aggregator's generator goal failed to bind an advertised output.
    #[error("instantiation error: {0}")]
    Instantiation(String),

    /// Insertion into a key-indexed table collided with an existing key.
    #[error("duplicate key in predicate '{predicate}': {key}")]
    DuplicateKey {
        /// Name of the predicate whose key index rejected the insert.
        predicate: String,
        /// Formatted key that collided.
        key: String,
    },

    /// Program-level structural error: a dependency cycle through rules, a
    /// conflict between static seeding and rule-derived extent, or a lifecycle
    /// call out of order.
    #[error("invalid program: {0}")]
    InvalidProgram(String),

    /// A host-supplied primitive or function raised an error while a rule
    /// was executing.
    #[error("rule execution failed in predicate '{predicate}' rule #{rule_index} subgoal #{subgoal_index}: {cause}")]
    RuleExecution {
        /// Predicate whose rule failed.
        predicate: String,
        /// Index of the failing rule within that predicate's rule list.
        rule_index: usize,
        /// Index of the failing subgoal within the rule body.
        subgoal_index: usize,
        /// Human-readable description of the underlying cause.
        cause: String,
    },

    /// A `Constant` goal argument failed a runtime type check during
    /// compilation.
    #[error("type error: expected {expected:?}, found value of type {found:?} ({detail})")]
    Type {
        /// Type the column declares.
        expected: DataType,
        /// Type the offending value actually carries.
        found: DataType,
        /// Extra context (e.g. which argument position).
        detail: String,
    },

    /// A mutating operation on a general index was attempted without
    /// enabling mutation on that index.
    #[error("index contract violation: {0}")]
    IndexContract(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn instantiation(msg: impl Into<String>) -> Self {
        Error::Instantiation(msg.into())
    }

    pub(crate) fn invalid_program(msg: impl Into<String>) -> Self {
        Error::InvalidProgram(msg.into())
    }

    pub(crate) fn index_contract(msg: impl Into<String>) -> Self {
        Error::IndexContract(msg.into())
    }
}

/// Wraps the cause of a [`Error::RuleExecution`] before it is attributed to a
/// specific rule/subgoal by the executor.
#[derive(Debug, Clone)]
pub struct PrimitiveError(pub String);

impl fmt::Display for PrimitiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PrimitiveError {}

impl From<String> for PrimitiveError {
    fn from(s: String) -> Self {
        PrimitiveError(s)
    }
}

impl From<&str> for PrimitiveError {
    fn from(s: &str) -> Self {
        PrimitiveError(s.to_string())
    }
}
