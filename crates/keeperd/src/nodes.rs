//! Node membership subcommands.
//!
//! Thin glue between the CLI surface and keeper-core: the one-shot
//! commands (`add-node`, `refresh-node`, `list-nodes`) take a single
//! lock cycle and exit; `manage-nodes` and `wait-ready` park the
//! blocking loop on a worker thread and use the tokio runtime only for
//! signal handling.

use std::path::PathBuf;

use clap::Args;
use tracing::{info, warn};

use keeper_core::cmd::{CommandConfig, SystemCommandRunner};
use keeper_core::jstore::JsonFileMeta;
use keeper_core::meta::{self, RefreshOutcome};
use keeper_core::monitor::{CancelFlag, ConvergenceLoop, SleepWaiter, Waiter};
use keeper_core::reconcile::Reconciler;
use keeper_proto::defaults::DEFAULT_ERROR_LIMIT;
use keeper_proto::error::{KeeperError, KeeperResult};

#[derive(Args)]
pub struct ManageArgs {
    /// This node's pnn (its line index in the nodes file)
    #[arg(short, long)]
    pub pnn: u32,
}

#[derive(Args)]
pub struct AddArgs {
    /// Unique identity of the member
    #[arg(long)]
    pub identity: String,

    /// IP address CTDB should use for the member
    #[arg(long)]
    pub node: String,

    /// Position of the member in the nodes file
    #[arg(long)]
    pub pnn: u32,

    /// Mark the entry as already present in the nodes file
    #[arg(long)]
    pub in_nodes: bool,
}

#[derive(Args)]
pub struct RefreshArgs {
    /// Unique identity of the member
    #[arg(long)]
    pub identity: String,

    /// The member's (possibly new) IP address
    #[arg(long)]
    pub node: String,

    /// Position of the member in the nodes file
    #[arg(long)]
    pub pnn: u32,

    /// Add the member instead when it is not in the document yet
    #[arg(long)]
    pub or_add: bool,
}

#[derive(Args)]
pub struct WaitArgs {
    /// The pnn to wait for
    #[arg(short, long)]
    pub pnn: u32,
}

/// Flip `cancel` when SIGINT arrives so the blocking loop unwinds
/// cooperatively.
fn spawn_ctrl_c(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, stopping");
            cancel.cancel();
        }
    });
}

/// Run the convergence loop for this node until cancelled or the
/// failure ceiling is hit.
pub async fn manage(
    meta_path: PathBuf,
    nodes_path: PathBuf,
    config: CommandConfig,
    args: ManageArgs,
) -> KeeperResult<()> {
    let cancel = CancelFlag::new();
    spawn_ctrl_c(cancel.clone());

    info!(
        "managing nodes: pnn={} meta={} nodes={}",
        args.pnn,
        meta_path.display(),
        nodes_path.display()
    );

    let result = tokio::task::spawn_blocking(move || {
        let meta = JsonFileMeta::new(meta_path);
        let runner = SystemCommandRunner;
        let reconciler = Reconciler::new(
            args.pnn,
            &meta,
            nodes_path,
            &runner,
            config.reload_nodes_argv(),
        );
        let mut waiter = SleepWaiter::new(cancel);
        ConvergenceLoop::new(reconciler, &mut waiter, DEFAULT_ERROR_LIMIT).run()
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    match result {
        // Cancellation is the normal way out of manage-nodes.
        Err(KeeperError::Interrupted) => {
            info!("manage-nodes stopped");
            Ok(())
        }
        other => other,
    }
}

/// Add a member to the membership document.
pub fn add(meta_path: PathBuf, args: AddArgs) -> KeeperResult<()> {
    let meta = JsonFileMeta::new(meta_path);
    meta::add_node(&meta, &args.identity, &args.node, args.pnn, args.in_nodes)?;
    info!(
        "added identity=[{}] node={} pnn={}",
        args.identity, args.node, args.pnn
    );
    Ok(())
}

/// Update an existing member's address, optionally falling back to an
/// add when the member is not in the document yet.
pub fn refresh(meta_path: PathBuf, args: RefreshArgs) -> KeeperResult<()> {
    let meta = JsonFileMeta::new(meta_path);
    match meta::refresh_node(&meta, &args.identity, &args.node, args.pnn)? {
        RefreshOutcome::Updated => {
            info!(
                "refreshed identity=[{}] pnn={} to node={}",
                args.identity, args.pnn, args.node
            );
            Ok(())
        }
        RefreshOutcome::Unchanged => Ok(()),
        RefreshOutcome::NotPresent if args.or_add => {
            info!(
                "identity=[{}] pnn={} not present, adding",
                args.identity, args.pnn
            );
            meta::add_node(&meta, &args.identity, &args.node, args.pnn, false)
        }
        RefreshOutcome::NotPresent => {
            warn!(
                "no entry for identity=[{}] pnn={}",
                args.identity, args.pnn
            );
            // Distinct exit code so wrappers can fall back to add-node.
            std::process::exit(2);
        }
    }
}

/// Print the nodes file content derived from the document to stdout.
pub fn list(meta_path: PathBuf) -> KeeperResult<()> {
    let meta = JsonFileMeta::new(meta_path);
    for line in meta::meta_to_nodes(&meta)? {
        println!("{}", line);
    }
    Ok(())
}

/// Block until the given pnn's entry is ready.
pub async fn wait_ready(meta_path: PathBuf, args: WaitArgs) -> KeeperResult<()> {
    let cancel = CancelFlag::new();
    spawn_ctrl_c(cancel.clone());

    tokio::task::spawn_blocking(move || {
        let meta = JsonFileMeta::new(meta_path);
        let mut waiter = SleepWaiter::new(cancel);
        loop {
            // The document may not exist yet while the first node
            // bootstraps; that reads as "not ready", not as a fault.
            let ready = match meta::pnn_ready(&meta, args.pnn) {
                Ok(ready) => ready,
                Err(KeeperError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(e),
            };
            if ready {
                info!("pnn {} is ready", args.pnn);
                return Ok(());
            }
            info!("waiting for pnn {} to become ready", args.pnn);
            waiter.wait()?;
        }
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}
