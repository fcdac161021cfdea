//! `schemata install-clone-function` - (re)install the clone procedure.

use schemata_postgres::PgSchemaAdmin;

use crate::cli::GlobalArgs;
use crate::commands::Project;
use crate::error::CliResult;
use crate::output;

/// Run the install-clone-function command
pub async fn run(global: &GlobalArgs) -> CliResult<()> {
    let project = Project::load(global)?;
    PgSchemaAdmin::new(project.pool.clone())
        .install_clone_function()
        .await?;
    output::success("Installed public.clone_schema");
    Ok(())
}
