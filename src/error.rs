//! Error types for eventql.
//!
//! All errors that can occur while preparing a query are represented by
//! [`QueryError`]. Errors are propagated via `Result<T, QueryError>`
//! throughout the crate and surfaced to the caller as query-validation
//! failures.
//!
//! # Error Classification
//!
//! Errors are classified into three categories:
//! - **Validation** — unknown tables or fields, lazy tables reached with
//!   nothing to read, malformed trees. Fatal for the current query.
//! - **Config** — modifiers that could not be parsed.
//! - **Internal** — bugs.
//!
//! Every error is a deterministic function of the input query, the schema
//! and the modifiers, so none of them is retryable. A filter that cannot be
//! pushed down is not an error at all: the extractor returns `None`.

use std::fmt;

/// Primary error type for the crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    // ── Validation errors ────────────────────────────────────────────────
    /// A table name is not registered in the [`Database`](crate::database::Database).
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A field chain names something the table does not have.
    #[error("unknown field \"{field}\" on table \"{table}\"")]
    UnknownField { table: String, field: String },

    /// A lazy table or join could not be turned into a concrete subquery.
    #[error("resolution error: {0}")]
    ResolutionError(String),

    /// The query tree is structurally invalid (e.g. a chain names a table
    /// without naming a field).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // ── Config errors ────────────────────────────────────────────────────
    /// A modifier value could not be parsed.
    #[error("config error: {0}")]
    ConfigError(String),

    // ── Internal errors — should not happen ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Convenience alias used across the crate.
pub type Result<T, E = QueryError> = std::result::Result<T, E>;

impl QueryError {
    /// Shorthand for [`QueryError::UnknownField`].
    pub fn unknown_field(table: impl Into<String>, field: impl Into<String>) -> Self {
        QueryError::UnknownField {
            table: table.into(),
            field: field.into(),
        }
    }

    /// Whether retrying the same compilation could succeed.
    ///
    /// Always `false`: compilation is pure, so the same input fails the
    /// same way every time.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Classify the error for reporting.
    pub fn kind(&self) -> QueryErrorKind {
        match self {
            QueryError::UnknownTable(_)
            | QueryError::UnknownField { .. }
            | QueryError::ResolutionError(_)
            | QueryError::InvalidQuery(_) => QueryErrorKind::Validation,

            QueryError::ConfigError(_) => QueryErrorKind::Config,

            QueryError::InternalError(_) => QueryErrorKind::Internal,
        }
    }
}

/// Classification of error kind for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Validation,
    Config,
    Internal,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::Validation => write!(f, "VALIDATION"),
            QueryErrorKind::Config => write!(f, "CONFIG"),
            QueryErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}
