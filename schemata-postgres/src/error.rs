//! Error types for the PostgreSQL backend.

use schemata_core::TenancyError;
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors raised by the PostgreSQL backend.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A tenancy rule was violated before anything reached the database.
    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    /// Migration file error.
    #[error("migration file '{file}': {message}")]
    MigrationFile {
        /// File name.
        file: String,
        /// What went wrong.
        message: String,
    },

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a migration file error.
    pub fn migration_file(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MigrationFile {
            file: file.into(),
            message: message.into(),
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sqlstate(&self) -> Option<&SqlState> {
        match self {
            Self::Postgres(e) => e.code(),
            _ => None,
        }
    }

    /// `42883`: the called function does not exist.
    pub fn is_undefined_function(&self) -> bool {
        self.sqlstate() == Some(&SqlState::UNDEFINED_FUNCTION)
    }

    /// `42P06`: the schema already exists.
    pub fn is_duplicate_schema(&self) -> bool {
        self.sqlstate() == Some(&SqlState::DUPLICATE_SCHEMA)
    }

    /// `3F000`: the schema does not exist.
    pub fn is_invalid_schema(&self) -> bool {
        self.sqlstate() == Some(&SqlState::INVALID_SCHEMA_NAME)
    }

    /// `23505`: a unique constraint was violated.
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate() == Some(&SqlState::UNIQUE_VIOLATION)
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Pool(_) => true,
            Self::Postgres(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Convert with `schema` as the subject of existence errors.
    pub fn for_schema(self, schema: &str) -> TenancyError {
        if self.is_duplicate_schema() {
            TenancyError::AlreadyExists(schema.to_string())
        } else if self.is_invalid_schema() {
            TenancyError::DoesNotExist(schema.to_string())
        } else {
            self.into()
        }
    }
}

impl From<PgError> for TenancyError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Tenancy(e) => e,
            PgError::Config(msg) => TenancyError::Config(msg),
            PgError::Io(e) => TenancyError::Io(e),
            PgError::Pool(e) => TenancyError::database_source("could not acquire a connection", e),
            PgError::Postgres(e) => {
                let message = match e.as_db_error() {
                    Some(db) => format!("{} ({})", db.message(), db.code().code()),
                    None => e.to_string(),
                };
                TenancyError::database_source(message, e)
            }
            err @ PgError::MigrationFile { .. } => TenancyError::Config(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PgError::config("invalid URL");
        assert!(matches!(err, PgError::Config(_)));
        assert!(!err.is_connection_error());
        assert!(err.sqlstate().is_none());
    }

    #[test]
    fn test_into_tenancy_error() {
        let err: TenancyError = PgError::config("missing url").into();
        assert!(matches!(err, TenancyError::Config(_)));

        let err: TenancyError = PgError::from(TenancyError::not_found("tenant 'x'")).into();
        assert!(err.is_not_found());

        let err: TenancyError = PgError::migration_file("0001_init.sql", "empty").into();
        assert!(err.to_string().contains("0001_init.sql"));
    }

    #[test]
    fn test_for_schema_passes_through_other_errors() {
        let err = PgError::config("bad").for_schema("acme");
        assert!(matches!(err, TenancyError::Config(_)));
    }
}
