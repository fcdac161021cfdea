//! `schemata create` - provision a tenant or a bare namespace.

use schemata_core::{CreateOptions, NewDomain, TenantProvisioner, TenantStore};

use crate::cli::{CreateArgs, GlobalArgs};
use crate::commands::Project;
use crate::error::{CliError, CliResult};
use crate::output;

/// Run the create command
pub async fn run(global: &GlobalArgs, args: CreateArgs) -> CliResult<()> {
    output::header("Create");

    let project = Project::load(global)?;
    let manager = project.manager().await?;

    if args.schema_only {
        let created = manager
            .create(
                &args.name,
                CreateOptions {
                    check_if_exists: args.if_not_exists,
                    sync_schema: !args.no_migrate,
                },
            )
            .await?;
        if created {
            output::success(&format!("Created schema '{}'", args.name));
        } else {
            output::info(&format!("Schema '{}' already exists", args.name));
        }
        return Ok(());
    }

    let store = project.require_store("create")?;
    let domains = args
        .domains
        .iter()
        .enumerate()
        .map(|(i, binding)| parse_domain(binding, i == 0))
        .collect::<CliResult<Vec<_>>>()?;

    if let Some(reference) = manager.clone_reference() {
        output::kv("Clone reference", reference.as_str());
    }
    for domain in &domains {
        output::kv("Domain", &domain_label(domain));
    }

    let provisioner = TenantProvisioner::new(store as std::sync::Arc<dyn TenantStore>, manager);
    let record = provisioner.create_tenant(&args.name, domains).await?;

    output::newline();
    output::success(&format!(
        "Created tenant '{}' (id {})",
        record.schema_name, record.id
    ));
    Ok(())
}

/// Parse `domain` or `domain/folder`.
pub fn parse_domain(binding: &str, primary: bool) -> CliResult<NewDomain> {
    let binding = binding.trim().trim_end_matches('/');
    let (domain, folder) = match binding.split_once('/') {
        Some((domain, folder)) => (domain, Some(folder)),
        None => (binding, None),
    };
    if domain.is_empty() || folder.is_some_and(|f| f.is_empty() || f.contains('/')) {
        return Err(CliError::Command(format!(
            "invalid domain '{binding}': expected `domain` or `domain/folder`"
        )));
    }

    let mut new = NewDomain::new(domain);
    if let Some(folder) = folder {
        new = new.with_folder(folder);
    }
    if primary {
        new = new.primary();
    }
    Ok(new)
}

fn domain_label(domain: &NewDomain) -> String {
    let mut label = if domain.folder.is_empty() {
        domain.domain.clone()
    } else {
        format!("{}/{}", domain.domain, domain.folder)
    };
    if domain.is_primary {
        label.push_str(" (primary)");
    }
    label
}
