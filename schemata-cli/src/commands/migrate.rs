//! `schemata migrate` - apply pending migrations across schemas.

use std::sync::Arc;

use schemata_core::{MigrationRunner, command_fn};
use schemata_postgres::PgMigrationRunner;

use crate::cli::{GlobalArgs, MigrateArgs};
use crate::commands::{Project, finish};
use crate::error::CliResult;
use crate::output;

/// Run the migrate command
pub async fn run(global: &GlobalArgs, args: MigrateArgs) -> CliResult<()> {
    output::header("Migrate");

    let project = Project::load(global)?;
    let mut section = project.config.migrations.clone();
    if let Some(directory) = args.directory {
        section.directory = directory;
    }
    let selection = args.selection.selection()?;
    let mode = args.execution.mode(project.config.executor.max_workers);

    output::kv("Migrations", &section.directory.display().to_string());
    let runner = Arc::new(PgMigrationRunner::from_section(project.pool.clone(), &section).await?);
    output::kv("Files", &runner.migrations().len().to_string());

    let schemas = project.catalog().collect(&selection).await?;
    output::kv("Schemas", &schemas.len().to_string());
    output::newline();

    if schemas.is_empty() {
        output::info("No schemas selected.");
        return Ok(());
    }

    let command = Arc::new(command_fn("migrate", move |schema| {
        let runner = runner.clone();
        async move { runner.apply(schema.name()).await }
    }));
    let report = project.executor(&args.execution).run(schemas, command, mode).await?;
    finish(&report)
}
