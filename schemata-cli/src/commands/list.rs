//! `schemata list` - print the selected schemas in processing order.

use futures::TryStreamExt;
use owo_colors::OwoColorize;

use crate::cli::{GlobalArgs, ListArgs};
use crate::commands::Project;
use crate::error::CliResult;
use crate::output;

/// Run the list command
pub async fn run(global: &GlobalArgs, args: ListArgs) -> CliResult<()> {
    let project = Project::load(global)?;
    let selection = args.selection.selection()?;
    let catalog = project.catalog();

    output::header("Schemas");
    let mut stream = catalog.iterate(&selection).await?;
    let mut count = 0usize;
    while let Some(schema) = stream.try_next().await? {
        let class = if schema.is_dynamic() {
            "dynamic"
        } else if project.config.tenancy.clone_reference() == Some(schema.name()) {
            "reference"
        } else {
            "static"
        };
        let identifier = schema.display_identifier();
        if identifier == schema.name().as_str() {
            println!("  {:<32} {}", schema.name(), class.dimmed());
        } else {
            println!("  {:<32} {} {}", schema.name(), class.dimmed(), identifier.cyan());
        }
        count += 1;
    }

    output::newline();
    output::dim(&format!("{count} schema(s)"));
    Ok(())
}
