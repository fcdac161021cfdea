//! `schemata drop` - drop a tenant schema and, for dynamic tenants, its record.

use std::sync::Arc;

use schemata_core::{DropOptions, TenantProvisioner, TenantStore};

use tracing::info;

use crate::cli::{DropArgs, GlobalArgs};
use crate::commands::Project;
use crate::error::CliResult;
use crate::output;

/// Run the drop command
pub async fn run(global: &GlobalArgs, args: DropArgs) -> CliResult<()> {
    output::header("Drop");

    let project = Project::load(global)?;
    if !args.yes {
        output::warn(&format!(
            "This will delete schema '{}' and all data in it!",
            args.name
        ));
        output::newline();
        if !output::confirm("Are you sure?") {
            output::newline();
            output::info("Drop cancelled.");
            return Ok(());
        }
        output::newline();
    }

    let manager = project.manager().await?;
    let record = match &project.store {
        Some(store) => store.find_by_schema_name(&args.name).await?,
        None => None,
    };

    if let (Some(store), Some(_)) = (&project.store, record) {
        let provisioner = TenantProvisioner::new(store.clone() as Arc<dyn TenantStore>, manager);
        provisioner.delete_tenant(&args.name).await?;
        info!(schema = %args.name, "deleted tenant record and schema");
        output::success(&format!("Deleted tenant '{}'", args.name));
        return Ok(());
    }

    let dropped = manager
        .drop_schema(
            &args.name,
            DropOptions {
                check_if_exists: args.if_exists,
            },
        )
        .await?;
    info!(schema = %args.name, dropped, "drop finished");
    if dropped {
        output::success(&format!("Dropped schema '{}'", args.name));
    } else {
        output::info(&format!("Schema '{}' does not exist", args.name));
    }
    Ok(())
}
