//! `schemata exec` - run raw SQL in every selected schema.

use std::sync::Arc;

use async_trait::async_trait;
use schemata_core::{Schema, SchemaCommand, TenancyResult};
use schemata_postgres::{TenantConnection, TenantPool};

use crate::cli::{ExecArgs, GlobalArgs};
use crate::commands::{Project, finish};
use crate::error::{CliError, CliResult};
use crate::output;

/// Runs a SQL batch; each worker keeps one connection for all its schemas.
struct SqlCommand {
    pool: TenantPool,
    sql: String,
}

#[async_trait]
impl SchemaCommand for SqlCommand {
    type Session = TenantConnection;

    async fn open_session(&self) -> TenancyResult<TenantConnection> {
        Ok(self.pool.get().await?)
    }

    async fn run(&self, session: &mut TenantConnection, _schema: &Schema) -> TenancyResult<()> {
        session.batch_execute(&self.sql).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "exec"
    }
}

/// Run the exec command
pub async fn run(global: &GlobalArgs, args: ExecArgs) -> CliResult<()> {
    output::header("Exec");

    let sql = match (args.sql, &args.file) {
        (Some(sql), _) => sql,
        (None, Some(path)) => tokio::fs::read_to_string(path).await?,
        (None, None) => return Err(CliError::Command("pass --sql or --file".into())),
    };
    if sql.trim().is_empty() {
        return Err(CliError::Command("nothing to execute".into()));
    }

    let project = Project::load(global)?;
    let selection = args.selection.selection()?;
    let mode = args.execution.mode(project.config.executor.max_workers);
    let schemas = project.catalog().collect(&selection).await?;
    output::kv("Schemas", &schemas.len().to_string());
    output::newline();

    if schemas.is_empty() {
        output::info("No schemas selected.");
        return Ok(());
    }

    let command = Arc::new(SqlCommand {
        pool: project.pool.clone(),
        sql,
    });
    let report = project.executor(&args.execution).run(schemas, command, mode).await?;
    finish(&report)
}
