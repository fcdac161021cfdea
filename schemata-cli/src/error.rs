//! CLI error types and result alias.

use miette::Diagnostic;
use schemata_core::TenancyError;
use schemata_postgres::PgError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(schemata::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(schemata::config),
        help("run `schemata init` to create a schemata.toml")
    )]
    Config(String),

    /// Tenancy error
    #[error("{0}")]
    #[diagnostic(code(schemata::tenancy))]
    Tenancy(#[from] TenancyError),

    /// Database error
    #[error("Database error: {0}")]
    #[diagnostic(code(schemata::database))]
    Database(String),

    /// One or more schemas failed
    #[error("{failed} schema(s) failed, {skipped} skipped, {workers} worker(s) failed to start")]
    #[diagnostic(code(schemata::failed))]
    Failed {
        /// Failed schemas.
        failed: usize,
        /// Schemas never started.
        skipped: usize,
        /// Parallel workers that could not open a session.
        workers: usize,
    },

    /// Command error
    #[error("Command error: {0}")]
    #[diagnostic(code(schemata::command))]
    Command(String),
}

impl From<PgError> for CliError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Tenancy(e) => CliError::Tenancy(e),
            PgError::Config(message) => CliError::Config(message),
            other => CliError::Database(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}
