//! schemata CLI - run administrative commands across tenant schemas.

use clap::Parser;

use schemata_cli::cli::{Cli, Command};
use schemata_cli::commands;
use schemata_cli::error::CliResult;
use schemata_cli::output;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::newline();
        output::error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    commands::init_logging(cli.global.verbose);

    match cli.command {
        Command::Init(args) => commands::init::run(args).await,
        Command::List(args) => commands::list::run(&cli.global, args).await,
        Command::Migrate(args) => commands::migrate::run(&cli.global, args).await,
        Command::Exec(args) => commands::exec::run(&cli.global, args).await,
        Command::Create(args) => commands::create::run(&cli.global, args).await,
        Command::Clone(args) => commands::clone::run(&cli.global, args).await,
        Command::Drop(args) => commands::drop::run(&cli.global, args).await,
        Command::InstallCloneFunction => commands::install::run(&cli.global).await,
    }
}
