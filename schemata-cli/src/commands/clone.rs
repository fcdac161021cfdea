//! `schemata clone` - copy a schema, structure and data, into a new one.

use crate::cli::{CloneArgs, GlobalArgs};
use crate::commands::Project;
use crate::error::CliResult;
use crate::output;

/// Run the clone command
pub async fn run(global: &GlobalArgs, args: CloneArgs) -> CliResult<()> {
    output::header(if args.dry_run { "Clone (dry run)" } else { "Clone" });

    let project = Project::load(global)?;
    let manager = project.manager().await?;

    output::kv("Source", &args.source);
    output::kv("Destination", &args.dest);
    output::newline();

    manager.clone_from(&args.source, &args.dest, args.dry_run).await?;

    if args.dry_run {
        output::success("Dry run succeeded; nothing was kept.");
    } else {
        output::success(&format!("Cloned '{}' into '{}'", args.source, args.dest));
    }
    Ok(())
}
