//! Command-line interface.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands, ServeArgs};

use commands::operator::OperatorAction;

/// Run one parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => commands::serve::execute(args, config).await,
        Commands::Ingest { file, url, check } => {
            let url = commands::ingress_url(&config, url);
            commands::ingest::execute(&file, &url, check, cli.json).await
        }
        Commands::Status { target } => {
            commands::status::execute(&config, target.as_deref(), cli.json).await
        }
        Commands::Rollback { target, url } => {
            let url = commands::ingress_url(&config, url);
            commands::operator::execute(OperatorAction::Rollback, &target, &url, cli.json).await
        }
        Commands::Unfreeze { target, url } => {
            let url = commands::ingress_url(&config, url);
            commands::operator::execute(OperatorAction::Unfreeze, &target, &url, cli.json).await
        }
        Commands::Budget { target } => commands::budget::execute(&config, &target, cli.json).await,
        Commands::Config => commands::config::execute(config, cli.json),
    }
}

/// Print `err` with its cause chain and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({ "error": err.to_string(), "causes": causes });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}
