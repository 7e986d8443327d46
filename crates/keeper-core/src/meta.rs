//! Membership document operations.
//!
//! Add and refresh run before the convergence loop takes over: a node
//! joining the cluster first publishes its desired identity/address/
//! pnn here, and only the reconciler moves that intent into the
//! physical nodes file. All operations take one lock, perform one
//! load-check-maybe-dump cycle, and release.

use tracing::debug;

use keeper_proto::error::{KeeperError, KeeperResult};
use keeper_proto::node::{ClusterMetaDoc, NodeEntry, NodeState};

use crate::jstore::{ClusterMeta, OpenMode};
use crate::nodes_file::entry_line;

/// Result of a refresh operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The entry's address changed; its state is now `changed`.
    Updated,
    /// The entry already carried this address; nothing written.
    Unchanged,
    /// No entry matches this identity/pnn. Recoverable: callers fall
    /// back to [`add_node`].
    NotPresent,
}

/// Add a member to the document with state `new`, or `ready` when
/// `in_nodes` says its address is already physically present in the
/// nodes file. Both the pnn and the identity must be unused.
pub fn add_node(
    meta: &dyn ClusterMeta,
    identity: &str,
    node: &str,
    pnn: u32,
    in_nodes: bool,
) -> KeeperResult<()> {
    let mut handle = meta.open(OpenMode::ReadWrite)?;
    let mut doc = handle.load()?;
    for entry in &doc.nodes {
        if entry.pnn == pnn {
            return Err(KeeperError::DuplicatePnn(pnn));
        }
        if entry.identity == identity {
            return Err(KeeperError::DuplicateIdentity(identity.to_string()));
        }
    }
    let state = if in_nodes {
        NodeState::Ready
    } else {
        NodeState::New
    };
    doc.nodes.push(NodeEntry {
        identity: identity.to_string(),
        node: node.to_string(),
        pnn,
        state,
    });
    handle.dump(&doc)?;
    debug!(
        "added entry identity=[{}] node={} pnn={} state={}",
        identity, node, pnn, state
    );
    Ok(())
}

/// Update an existing member's address, marking it `changed` so the
/// reconciler performs the two-step disable-then-publish swap.
pub fn refresh_node(
    meta: &dyn ClusterMeta,
    identity: &str,
    node: &str,
    pnn: u32,
) -> KeeperResult<RefreshOutcome> {
    let mut handle = meta.open(OpenMode::ReadWrite)?;
    let mut doc = handle.load()?;
    let mut found = None;
    for (idx, entry) in doc.nodes.iter().enumerate() {
        if entry.pnn == pnn && entry.identity == identity {
            found = Some(idx);
            break;
        }
        if entry.pnn == pnn {
            // The slot is taken by someone else entirely. That is a
            // configuration problem, not a "go add yourself" case.
            return Err(KeeperError::PnnConflict {
                pnn,
                identity: entry.identity.clone(),
            });
        }
    }
    let Some(idx) = found else {
        return Ok(RefreshOutcome::NotPresent);
    };
    if doc.nodes[idx].node == node {
        return Ok(RefreshOutcome::Unchanged);
    }
    doc.nodes[idx].node = node.to_string();
    doc.nodes[idx].state = NodeState::Changed;
    handle.dump(&doc)?;
    debug!(
        "refreshed entry identity=[{}] pnn={} to node={}",
        identity, pnn, node
    );
    Ok(RefreshOutcome::Updated)
}

/// True when the pnn has an entry in the document and that entry is
/// `ready` (its address is confirmed present in the nodes file).
pub fn pnn_ready(meta: &dyn ClusterMeta, pnn: u32) -> KeeperResult<bool> {
    let mut handle = meta.open(OpenMode::Read)?;
    let doc = handle.load()?;
    Ok(doc
        .nodes
        .iter()
        .any(|e| e.pnn == pnn && e.state == NodeState::Ready))
}

/// Render a complete nodes-file line list from the document alone,
/// for deployments where an external agent owns the document and the
/// local side only translates it.
pub fn meta_to_nodes(meta: &dyn ClusterMeta) -> KeeperResult<Vec<String>> {
    let mut handle = meta.open(OpenMode::Read)?;
    let doc = handle.load()?;
    Ok(render_nodes(&doc))
}

/// Build the line list for [`meta_to_nodes`]: one slot per pnn up to
/// the highest one present, each overwritten with its entry's expected
/// rendering.
pub(crate) fn render_nodes(doc: &ClusterMetaDoc) -> Vec<String> {
    let len = doc.nodes.iter().map(|e| e.pnn as usize + 1).max().unwrap_or(0);
    let mut lines = vec![String::new(); len];
    for entry in &doc.nodes {
        let line = entry_line(&lines, entry);
        lines[entry.pnn as usize] = line;
    }
    lines
}
