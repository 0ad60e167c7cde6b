//! Error types for rivven-bulk
//!
//! Errors fall into two groups:
//! - Buffer-level errors (schema mismatch, capacity, state) returned from `add`
//! - Transfer-level errors (constraints, cancellation, connection loss) that
//!   trigger a rollback and end up inside a failed `LoadReport`

use std::fmt;
use thiserror::Error;

/// Result type for rivven-bulk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Row or structured type does not match the expected schema
    Schema,
    /// Buffer limit reached
    Capacity,
    /// Operation not valid in the current lifecycle state
    State,
    /// No strategy can load the job into the target
    Strategy,
    /// Constraint violation (not retriable)
    Constraint,
    /// Load was cancelled by the caller
    Cancelled,
    /// Connection dropped mid-transfer (retriable as a whole job)
    Connection,
    /// Statement execution errors
    Query,
    /// Transaction begin/commit/rollback errors
    Transaction,
    /// Timeout errors (retriable)
    Timeout,
    /// Configuration error
    Configuration,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether a job that failed with this category can be retried as a whole
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

/// Main error type for rivven-bulk
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Row shape disagrees with the job schema
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// Buffer already holds the configured maximum number of rows
    #[error("capacity exceeded: buffer holds the maximum of {max_rows} rows")]
    CapacityExceeded { max_rows: usize },

    /// Operation not allowed in the current state
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// No loading strategy fits the job and target
    #[error("no viable strategy: {message}")]
    NoViableStrategy { message: String },

    /// Target rejected a row (PK, FK, unique, check, not-null)
    #[error("constraint violation{}: {message}", fmt_row_index(.row_index))]
    ConstraintViolation {
        message: String,
        row_index: Option<u64>,
    },

    /// Load was cancelled
    #[error("load cancelled")]
    Cancelled,

    /// Connection was lost during the transfer
    #[error("connection lost: {message}")]
    ConnectionLost {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Statement execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction error
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

fn fmt_row_index(row_index: &Option<u64>) -> String {
    match row_index {
        Some(idx) => format!(" at row {}", idx),
        None => String::new(),
    }
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SchemaMismatch { .. } => ErrorCategory::Schema,
            Self::CapacityExceeded { .. } => ErrorCategory::Capacity,
            Self::InvalidState { .. } => ErrorCategory::State,
            Self::NoViableStrategy { .. } => ErrorCategory::Strategy,
            Self::ConstraintViolation { .. } => ErrorCategory::Constraint,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::ConnectionLost { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Unsupported { .. } | Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Row index reported by the target, if any
    pub fn row_index(&self) -> Option<u64> {
        match self {
            Self::ConstraintViolation { row_index, .. } => *row_index,
            _ => None,
        }
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a no-viable-strategy error
    pub fn no_viable_strategy(message: impl Into<String>) -> Self {
        Self::NoViableStrategy {
            message: message.into(),
        }
    }

    /// Create a constraint violation, optionally pinned to a row
    pub fn constraint(message: impl Into<String>, row_index: Option<u64>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
            row_index,
        }
    }

    /// Create a connection-lost error
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection-lost error with source
    pub fn connection_lost_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConnectionLost {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach a row index to a constraint violation that lacks one
    pub fn at_row(self, index: u64) -> Self {
        match self {
            Self::ConstraintViolation {
                message,
                row_index: None,
            } => Self::ConstraintViolation {
                message,
                row_index: Some(index),
            },
            other => other,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => write!(f, "schema"),
            Self::Capacity => write!(f, "capacity"),
            Self::State => write!(f, "state"),
            Self::Strategy => write!(f, "strategy"),
            Self::Constraint => write!(f, "constraint"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Other => write!(f, "other"),
        }
    }
}
