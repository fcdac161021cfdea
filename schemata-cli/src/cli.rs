//! CLI argument definitions using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use schemata_core::catalog::WILDCARD_ALL;
use schemata_core::{ExecutionMode, SchemaSelection, TenancyResult};

use crate::config::CONFIG_FILE_NAME;

/// schemata - schema-per-tenant administration for PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "schemata")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "schemata - schema-per-tenant administration for PostgreSQL", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Options shared by every command
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Database URL, overriding the configuration file
    #[arg(long, global = true, env = "SCHEMATA_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a starter schemata.toml
    Init(InitArgs),

    /// List the selected schemas
    List(ListArgs),

    /// Apply pending migrations to the selected schemas
    Migrate(MigrateArgs),

    /// Execute SQL in every selected schema
    Exec(ExecArgs),

    /// Create a tenant schema
    Create(CreateArgs),

    /// Clone one schema into a new one
    Clone(CloneArgs),

    /// Drop a tenant schema
    Drop(DropArgs),

    /// Install or refresh the clone_schema procedure
    InstallCloneFunction,
}

// =============================================================================
// Shared Arguments
// =============================================================================

/// Which schemas a command applies to
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Schema name, domain, domain/folder or wildcard (:all:, :static:,
    /// :dynamic:, :clone_reference:, :public:). Defaults to :all:
    #[arg(short, long = "schema", value_name = "SCHEMA")]
    pub schemas: Vec<String>,

    /// Schema identifier or wildcard to leave out
    #[arg(short = 'x', long = "exclude", value_name = "SCHEMA")]
    pub excludes: Vec<String>,
}

impl SelectionArgs {
    /// Parse into a selection, selecting every schema when none was named.
    pub fn selection(&self) -> TenancyResult<SchemaSelection> {
        let includes = if self.schemas.is_empty() {
            vec![WILDCARD_ALL.to_string()]
        } else {
            self.schemas.clone()
        };
        SchemaSelection::parse(&includes, &self.excludes)
    }
}

/// How the selected schemas are processed
#[derive(Args, Debug, Clone, Default)]
pub struct ExecutionArgs {
    /// Process schemas concurrently
    #[arg(short, long)]
    pub parallel: bool,

    /// Worker count in parallel mode (defaults to [executor].max_workers)
    #[arg(short, long, requires = "parallel")]
    pub workers: Option<usize>,

    /// Stop at the first failing schema (sequential mode only)
    #[arg(long, conflicts_with = "parallel")]
    pub abort_on_failure: bool,

    /// Per-schema time limit in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl ExecutionArgs {
    /// The execution mode, with `default_workers` when none was given.
    pub fn mode(&self, default_workers: usize) -> ExecutionMode {
        if self.parallel {
            ExecutionMode::Parallel {
                max_workers: self.workers.unwrap_or(default_workers).max(1),
            }
        } else {
            ExecutionMode::Sequential {
                abort_on_failure: self.abort_on_failure,
            }
        }
    }

    /// The per-schema time limit.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

// =============================================================================
// Init Command
// =============================================================================

/// Arguments for the `init` command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to write schemata.toml into
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Database connection URL
    #[arg(short, long)]
    pub url: Option<String>,

    /// Enable dynamic tenants stored in the database
    #[arg(long)]
    pub dynamic: bool,

    /// Create the tenant tables and the clone procedure in the database
    #[arg(long)]
    pub install: bool,

    /// Overwrite an existing configuration file
    #[arg(short, long)]
    pub force: bool,
}

// =============================================================================
// List Command
// =============================================================================

/// Arguments for the `list` command
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
}

// =============================================================================
// Migrate Command
// =============================================================================

/// Arguments for the `migrate` command
#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub execution: ExecutionArgs,

    /// Migrations directory (defaults to [migrations].directory)
    #[arg(short, long)]
    pub directory: Option<PathBuf>,
}

// =============================================================================
// Exec Command
// =============================================================================

/// Arguments for the `exec` command
#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub execution: ExecutionArgs,

    /// SQL to execute
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub sql: Option<String>,

    /// Path to a SQL file
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

// =============================================================================
// Create / Clone / Drop Commands
// =============================================================================

/// Arguments for the `create` command
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Schema name
    pub name: String,

    /// Domain binding as `domain` or `domain/folder`; the first is primary
    #[arg(short, long = "domain", value_name = "DOMAIN")]
    pub domains: Vec<String>,

    /// Only create the namespace, without a tenant record
    #[arg(long, conflicts_with = "domains")]
    pub schema_only: bool,

    /// Skip migrations after creating the namespace
    #[arg(long, requires = "schema_only")]
    pub no_migrate: bool,

    /// Succeed when the namespace already exists
    #[arg(long, requires = "schema_only")]
    pub if_not_exists: bool,
}

/// Arguments for the `clone` command
#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Schema to copy
    pub source: String,

    /// New schema name
    pub dest: String,

    /// Run the clone and roll it back
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `drop` command
#[derive(Args, Debug)]
pub struct DropArgs {
    /// Schema name
    pub name: String,

    /// Succeed when the namespace does not exist
    #[arg(long)]
    pub if_exists: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}
