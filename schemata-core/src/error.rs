//! Error types for tenancy operations.
//!
//! Every error carries a stable [`ErrorCode`] so callers (HTTP layers, the CLI)
//! can map failures without matching on message text.
//!
//! # Error Codes
//!
//! Error codes follow a pattern: S{category}{number}
//! - 1xxx: Naming and lookup errors (invalid name, not found, ambiguous)
//! - 2xxx: Namespace existence errors
//! - 3xxx: Database errors
//! - 4xxx: Migration errors
//! - 5xxx: Configuration and I/O errors
//! - 6xxx: Execution errors
//! - 9xxx: Internal errors
//!
//! ```rust
//! use schemata_core::{ErrorCode, TenancyError};
//!
//! let err = TenancyError::not_found("host 'unknown.example.com'");
//! assert_eq!(err.code(), ErrorCode::NotFound);
//! assert_eq!(err.code().code(), "S1002");
//! ```

use std::fmt;

use thiserror::Error;

/// Boxed error used for opaque sources (driver errors, migration runners).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Schema name failed identifier validation (S1001).
    InvalidName = 1001,
    /// No tenant matched (S1002).
    NotFound = 1002,
    /// Identifier matched more than one tenant (S1003).
    Ambiguous = 1003,
    /// Namespace already exists (S2001).
    AlreadyExists = 2001,
    /// Namespace does not exist (S2002).
    DoesNotExist = 2002,
    /// Underlying statement failed (S3001).
    Database = 3001,
    /// Migration runner failed (S4001).
    Migration = 4001,
    /// Invalid configuration (S5001).
    Configuration = 5001,
    /// I/O failure (S5002).
    Io = 5002,
    /// Per-schema operation timed out (S6001).
    Timeout = 6001,
    /// Unscoped activation inside an async runtime (S6002).
    Unscoped = 6002,
    /// Internal error (S9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "S1001").
    pub fn code(&self) -> String {
        format!("S{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidName => "Invalid schema name",
            Self::NotFound => "Tenant not found",
            Self::Ambiguous => "Ambiguous tenant identifier",
            Self::AlreadyExists => "Schema already exists",
            Self::DoesNotExist => "Schema does not exist",
            Self::Database => "Database error",
            Self::Migration => "Migration error",
            Self::Configuration => "Invalid configuration",
            Self::Io => "I/O error",
            Self::Timeout => "Operation timed out",
            Self::Unscoped => "Activation outside a task scope",
            Self::Internal => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors that can occur while resolving, binding or administering tenants.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// The name is not a valid SQL identifier or uses the reserved `pg_` prefix.
    #[error("invalid schema name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No tenant matched a routing signal or catalog identifier.
    #[error("no tenant found for {0}")]
    NotFound(String),

    /// A targeted identifier matched more than one tenant.
    #[error("identifier '{identifier}' is ambiguous, it matches: {}", candidates.join(", "))]
    Ambiguous {
        /// The identifier that was looked up.
        identifier: String,
        /// Schema names of every match.
        candidates: Vec<String>,
    },

    /// The namespace exists but the operation requires that it does not.
    #[error("schema '{0}' already exists")]
    AlreadyExists(String),

    /// The namespace does not exist but the operation requires that it does.
    #[error("schema '{0}' does not exist")]
    DoesNotExist(String),

    /// A statement against the database failed.
    #[error("database error: {message}")]
    Database {
        /// Human readable message.
        message: String,
        /// Driver error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The external migration runner failed for a schema.
    #[error("migration of schema '{schema}' failed: {source}")]
    Migration {
        /// Schema being migrated.
        schema: String,
        /// Error reported by the runner.
        #[source]
        source: BoxError,
    },

    /// Configuration is invalid or missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A per-schema operation exceeded its time budget.
    #[error("operation on schema '{schema}' timed out after {duration_ms}ms")]
    Timeout {
        /// Schema the operation was running against.
        schema: String,
        /// Configured limit in milliseconds.
        duration_ms: u64,
    },

    /// `activate`/`deactivate` was called on an async runtime thread outside
    /// any `with_schema` scope, where the value would be shared by every task
    /// on that thread.
    #[error("cannot {0} the active schema outside a task scope; use with_schema")]
    Unscoped(&'static str),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TenancyError {
    /// Create an invalid name error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an ambiguity error.
    pub fn ambiguous(identifier: impl Into<String>, candidates: Vec<String>) -> Self {
        Self::Ambiguous {
            identifier: identifier.into(),
            candidates,
        }
    }

    /// Create a database error without a driver source.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error wrapping a driver error.
    pub fn database_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a migration error.
    pub fn migration(schema: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Migration {
            schema: schema.into(),
            source: source.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidName { .. } => ErrorCode::InvalidName,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Ambiguous { .. } => ErrorCode::Ambiguous,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::DoesNotExist(_) => ErrorCode::DoesNotExist,
            Self::Database { .. } => ErrorCode::Database,
            Self::Migration { .. } => ErrorCode::Migration,
            Self::Config(_) => ErrorCode::Configuration,
            Self::Io(_) => ErrorCode::Io,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Unscoped(_) => ErrorCode::Unscoped,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a name validation error.
    pub fn is_invalid_name(&self) -> bool {
        matches!(self, Self::InvalidName { .. })
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Validation, lookup and existence errors never change on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database { .. } | Self::Timeout { .. } | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::InvalidName.code(), "S1001");
        assert_eq!(ErrorCode::Migration.code(), "S4001");
        assert_eq!(ErrorCode::Internal.to_string(), "S9001");
        assert_eq!(TenancyError::Unscoped("activate").code().code(), "S6002");
    }

    #[test]
    fn test_error_display() {
        let err = TenancyError::invalid_name("pg_x", "reserved prefix");
        assert!(err.to_string().contains("pg_x"));

        let err = TenancyError::ambiguous("acme.com", vec!["a".into(), "b".into()]);
        assert_eq!(
            err.to_string(),
            "identifier 'acme.com' is ambiguous, it matches: a, b"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(TenancyError::database("connection reset").is_retryable());
        assert!(!TenancyError::invalid_name("", "empty").is_retryable());
        assert!(!TenancyError::AlreadyExists("acme".into()).is_retryable());
    }

    #[test]
    fn test_migration_source_preserved() {
        let err = TenancyError::migration("acme", "syntax error at line 3");
        assert_eq!(err.code(), ErrorCode::Migration);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("syntax error at line 3"));
    }
}
