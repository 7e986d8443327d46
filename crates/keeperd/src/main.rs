//! ctdb-keeper agent daemon (keeperd).
//!
//! Runs next to each containerized Samba/CTDB instance and keeps the
//! CTDB nodes file converged with the shared membership document.
//!
//! Usage:
//!   keeperd [OPTIONS] <COMMAND>
//!
//! Commands:
//!   manage-nodes   Run the convergence loop for this node
//!   add-node       Add a member to the membership document
//!   refresh-node   Update an existing member's address
//!   list-nodes     Print nodes file content derived from the document
//!   wait-ready     Block until a pnn's entry is ready
//!
//! `manage-nodes` is the long-running mode: each node's container
//! starts one, and together they converge the cluster's node list
//! with no coordinator.

mod nodes;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use keeper_core::cmd::CommandConfig;
use keeper_proto::defaults::{DEFAULT_META_PATH, DEFAULT_NODES_PATH};

/// CTDB node-membership agent for containerized Samba clusters.
#[derive(Parser)]
#[command(name = "keeperd", version, about = "CTDB node-membership agent")]
struct Cli {
    /// Path to the shared membership document (JSON)
    #[arg(short = 'm', long, default_value = DEFAULT_META_PATH)]
    meta: PathBuf,

    /// Path to the CTDB nodes file
    #[arg(short = 'n', long, default_value = DEFAULT_NODES_PATH)]
    nodes: PathBuf,

    /// Argv prefix prepended to external commands (repeatable)
    #[arg(long = "cmd-prefix", value_name = "ARG", allow_hyphen_values = true)]
    cmd_prefix: Vec<String>,

    /// CTDB debug level for external commands
    #[arg(long, value_name = "LEVEL")]
    debug_level: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the convergence loop for this node
    ManageNodes(nodes::ManageArgs),
    /// Add a member to the membership document
    AddNode(nodes::AddArgs),
    /// Update an existing member's address
    RefreshNode(nodes::RefreshArgs),
    /// Print the nodes file content derived from the document
    ListNodes,
    /// Block until the given pnn's entry is ready
    WaitReady(nodes::WaitArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = CommandConfig {
        prefix: cli.cmd_prefix.clone(),
        debug_level: cli.debug_level.clone(),
    };

    let result = match cli.command {
        Commands::ManageNodes(args) => {
            nodes::manage(cli.meta, cli.nodes, config, args).await
        }
        Commands::AddNode(args) => nodes::add(cli.meta, args),
        Commands::RefreshNode(args) => nodes::refresh(cli.meta, args),
        Commands::ListNodes => nodes::list(cli.meta),
        Commands::WaitReady(args) => nodes::wait_ready(cli.meta, args).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
