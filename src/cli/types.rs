//! CLI type definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "driftloop")]
#[command(about = "driftloop - drift-triggered retraining orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .driftloop/
    #[arg(short, long, global = true, env = "DRIFTLOOP_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the orchestrator and the HTTP drift ingress
    Serve(ServeArgs),

    /// Validate a drift event payload and submit it to a running server
    Ingest {
        /// JSON file with the drift event, or `-` for stdin
        file: String,

        /// Ingress base URL (defaults to http://<server.bind>)
        #[arg(long)]
        url: Option<String>,

        /// Only validate, do not submit
        #[arg(long)]
        check: bool,
    },

    /// Show stability records, budgets and recent jobs
    Status {
        /// Limit the view to one target
        target: Option<String>,
    },

    /// Roll a target back to its previous stable model
    Rollback {
        target: String,

        /// Ingress base URL (defaults to http://<server.bind>)
        #[arg(long)]
        url: Option<String>,
    },

    /// Clear a rollback-failure freeze on a target
    Unfreeze {
        target: String,

        /// Ingress base URL (defaults to http://<server.bind>)
        #[arg(long)]
        url: Option<String>,
    },

    /// Show the retrain budget of a target in the current window
    Budget { target: String },

    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Use scripted in-process collaborators instead of the HTTP backend
    #[arg(long)]
    pub dry_run: bool,

    /// Override `server.bind`
    #[arg(long)]
    pub bind: Option<String>,

    /// Record the registry's production model as baseline for these targets
    #[arg(long = "bootstrap", value_name = "TARGET")]
    pub bootstrap: Vec<String>,
}
