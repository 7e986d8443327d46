//! Node-membership reconciliation.
//!
//! Every agent process runs this same algorithm against the same
//! shared membership document and nodes file. There is no coordinator:
//! convergence comes from an optimistic read-only probe, a re-check
//! under the exclusive write lock, and a per-entry state machine that
//! only ever advances after the corresponding physical write is
//! confirmed on disk.
//!
//! The apply sequence (write nodes file, run the reload command,
//! persist the advanced states) is intentionally not one transaction.
//! A failure between any two steps leaves a diff the next cycle
//! re-derives and retries; idempotent retry is the recovery story.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use keeper_proto::error::{KeeperError, KeeperResult};
use keeper_proto::node::{ClusterMetaDoc, NodeState};

use crate::cmd::CommandRunner;
use crate::jstore::{ClusterMeta, OpenMode};
use crate::nodes_file::{self, entry_line, node_line};

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Both files already agree; nothing was locked for write.
    NoChange,
    /// The nodes file and/or entry states were updated.
    Changed,
}

/// What one pass over the document found to do.
struct Plan {
    /// Nodes-file lines as read when the plan was computed.
    lines: Vec<String>,
    /// Indices into `doc.nodes` needing a physical line write.
    writes: Vec<usize>,
    /// Indices needing a state advance. Superset of `writes`: an
    /// entry whose line already landed but whose state was never
    /// stepped (earlier crash) is advance-only.
    advances: Vec<usize>,
}

impl Plan {
    fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.advances.is_empty()
    }
}

/// Reconciles the shared membership document with the local CTDB
/// nodes file on behalf of one cluster member.
pub struct Reconciler<'a> {
    pnn: u32,
    meta: &'a dyn ClusterMeta,
    nodes_path: PathBuf,
    runner: &'a dyn CommandRunner,
    reload_argv: Vec<String>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        pnn: u32,
        meta: &'a dyn ClusterMeta,
        nodes_path: impl Into<PathBuf>,
        runner: &'a dyn CommandRunner,
        reload_argv: Vec<String>,
    ) -> Self {
        Self {
            pnn,
            meta,
            nodes_path: nodes_path.into(),
            runner,
            reload_argv,
        }
    }

    /// Admission gate: may this node mutate shared cluster topology?
    ///
    /// Only a node whose own address is already an accepted,
    /// uncommented line of the nodes file is trusted to make changes.
    /// A not-yet-joined node racing ahead here could corrupt the
    /// convergence state for everyone else.
    pub fn admitted(&self) -> KeeperResult<bool> {
        let doc = {
            let mut handle = self.meta.open(OpenMode::Read)?;
            handle.load()?
        };
        let lines = nodes_file::read_nodes(&self.nodes_path)?;

        let Some(mine) = doc.entry_for_pnn(self.pnn) else {
            warn!("pnn {} not found in membership document", self.pnn);
            return Ok(false);
        };
        Ok(lines.iter().any(|l| l == &mine.node))
    }

    /// One convergence cycle: probe, confirm, apply, advance.
    pub fn reconcile(&self) -> KeeperResult<Outcome> {
        // Optimistic probe under a read-only open. The steady state is
        // "nothing to do" and must never take the write lock.
        {
            let mut handle = self.meta.open(OpenMode::Read)?;
            let doc = handle.load()?;
            if self.plan(&doc)?.is_empty() {
                info!("examined nodes state - no changes");
                return Ok(Outcome::NoChange);
            }
        }

        // Time passed between releasing the probe lock and acquiring
        // this one; another agent may have converged the same diff.
        // Reload fresh and recompute before touching anything.
        let mut handle = self.meta.open(OpenMode::ReadWrite)?;
        let mut doc = handle.load()?;
        let plan = self.plan(&doc)?;
        if plan.is_empty() {
            info!("reexamined nodes state - no changes");
            return Ok(Outcome::NoChange);
        }

        self.apply(&doc, &plan)?;

        for &idx in &plan.advances {
            let entry = &mut doc.nodes[idx];
            entry.state = entry.state.next();
            debug!(
                "setting node identity=[{}] pnn={} to {}",
                entry.identity, entry.pnn, entry.state
            );
        }
        handle.dump(&doc)?;
        Ok(Outcome::Changed)
    }

    /// Classify every entry against the current nodes file.
    fn plan(&self, doc: &ClusterMetaDoc) -> KeeperResult<Plan> {
        let lines = nodes_file::read_nodes(&self.nodes_path)?;
        let mut writes = Vec::new();
        let mut advances = Vec::new();

        for (idx, entry) in doc.nodes.iter().enumerate() {
            // Reserved state; never acted on.
            if entry.state == NodeState::Gone {
                continue;
            }
            let matched = node_line(&lines, entry.pnn) == entry_line(&lines, entry);
            match (matched, entry.state) {
                // Line present and confirmed: converged, skip.
                (true, NodeState::Ready) => {}
                // Line present but the state machine never caught up.
                (true, _) => advances.push(idx),
                // A confirmed-stable entry has gone missing from the
                // physical file. Nothing here can repair that.
                (false, NodeState::Ready) => {
                    return Err(KeeperError::ReadyNodeMissing { pnn: entry.pnn });
                }
                (false, _) => {
                    writes.push(idx);
                    advances.push(idx);
                }
            }
        }
        Ok(Plan {
            lines,
            writes,
            advances,
        })
    }

    /// Write the planned lines and trigger the daemon reload.
    ///
    /// The new line list is built completely in memory first, so an
    /// invariant violation aborts before either file changes.
    fn apply(&self, doc: &ClusterMetaDoc, plan: &Plan) -> KeeperResult<()> {
        let mut lines = plan.lines.clone();
        for &idx in &plan.writes {
            let entry = &doc.nodes[idx];
            let expected = entry_line(&plan.lines, entry);
            if node_line(&lines, entry.pnn) == expected {
                continue;
            }
            let pnn = entry.pnn as usize;
            if entry.state == NodeState::New {
                // Slots grow append-only: no gaps, no reuse.
                if pnn != lines.len() {
                    return Err(KeeperError::UnexpectedPnn {
                        pnn: entry.pnn,
                        len: lines.len(),
                    });
                }
                lines.push(expected);
            } else {
                if pnn >= lines.len() {
                    return Err(KeeperError::UnexpectedPnn {
                        pnn: entry.pnn,
                        len: lines.len(),
                    });
                }
                lines[pnn] = expected;
            }
        }

        info!(
            "writing updates to nodes file {}",
            self.nodes_path.display()
        );
        nodes_file::write_nodes(&self.nodes_path, &lines)?;
        info!("running: {}", self.reload_argv.join(" "));
        self.runner.run(&self.reload_argv)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::RecordingRunner;
    use crate::jstore::MemoryMeta;
    use keeper_proto::node::NodeEntry;
    use std::path::PathBuf;

    fn entry(identity: &str, node: &str, pnn: u32, state: NodeState) -> NodeEntry {
        NodeEntry {
            identity: identity.to_string(),
            node: node.to_string(),
            pnn,
            state,
        }
    }

    fn reload_argv() -> Vec<String> {
        vec!["ctdb".to_string(), "reloadnodes".to_string()]
    }

    struct Harness {
        meta: MemoryMeta,
        runner: RecordingRunner,
        _dir: tempfile::TempDir,
        nodes_path: PathBuf,
    }

    impl Harness {
        fn new(entries: Vec<NodeEntry>, lines: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let nodes_path = dir.path().join("nodes");
            if !lines.is_empty() {
                let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
                nodes_file::write_nodes(&nodes_path, &lines).unwrap();
            }
            Self {
                meta: MemoryMeta::new(ClusterMetaDoc { nodes: entries }),
                runner: RecordingRunner::new(),
                _dir: dir,
                nodes_path,
            }
        }

        fn reconciler(&self, pnn: u32) -> Reconciler<'_> {
            Reconciler::new(pnn, &self.meta, &self.nodes_path, &self.runner, reload_argv())
        }

        fn nodes_content(&self) -> String {
            std::fs::read_to_string(&self.nodes_path).unwrap_or_default()
        }
    }

    #[test]
    fn test_first_node_bootstrap() {
        // Single new entry, empty nodes file: one cycle appends the
        // address, reloads once, and marks the entry ready.
        let h = Harness::new(vec![entry("node0", "10.0.0.1", 0, NodeState::New)], &[]);
        let outcome = h.reconciler(0).reconcile().unwrap();

        assert_eq!(outcome, Outcome::Changed);
        assert_eq!(h.nodes_content(), "10.0.0.1\n");
        assert_eq!(h.runner.call_count(), 1);
        assert_eq!(h.runner.calls()[0], reload_argv());
        assert_eq!(h.meta.snapshot().nodes[0].state, NodeState::Ready);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let h = Harness::new(vec![entry("node0", "10.0.0.1", 0, NodeState::New)], &[]);
        let r = h.reconciler(0);
        assert_eq!(r.reconcile().unwrap(), Outcome::Changed);

        // Second cycle: converged, no rewrite, no extra reload.
        let mtime = std::fs::metadata(&h.nodes_path).unwrap().modified().unwrap();
        assert_eq!(r.reconcile().unwrap(), Outcome::NoChange);
        assert_eq!(r.reconcile().unwrap(), Outcome::NoChange);
        assert_eq!(h.runner.call_count(), 1);
        assert_eq!(
            std::fs::metadata(&h.nodes_path).unwrap().modified().unwrap(),
            mtime
        );
    }

    #[test]
    fn test_multi_node_convergence() {
        // Three new entries in pnn order converge to a three-line file
        // with every state ready.
        let h = Harness::new(
            vec![
                entry("node0", "10.0.0.1", 0, NodeState::New),
                entry("node1", "10.0.0.2", 1, NodeState::New),
                entry("node2", "10.0.0.3", 2, NodeState::New),
            ],
            &[],
        );
        let r = h.reconciler(0);
        while r.reconcile().unwrap() == Outcome::Changed {}

        assert_eq!(h.nodes_content(), "10.0.0.1\n10.0.0.2\n10.0.0.3\n");
        let doc = h.meta.snapshot();
        assert!(doc.nodes.iter().all(|e| e.state == NodeState::Ready));
    }

    #[test]
    fn test_two_phase_address_change() {
        // Cycle 1 disables the old address in place; only cycle 2
        // publishes the new one.
        let h = Harness::new(
            vec![entry("node0", "10.0.0.9", 0, NodeState::Changed)],
            &["10.0.0.1"],
        );
        let r = h.reconciler(0);

        assert_eq!(r.reconcile().unwrap(), Outcome::Changed);
        assert_eq!(h.nodes_content(), "#10.0.0.1\n");
        assert_eq!(h.meta.snapshot().nodes[0].state, NodeState::Replaced);

        assert_eq!(r.reconcile().unwrap(), Outcome::Changed);
        assert_eq!(h.nodes_content(), "10.0.0.9\n");
        assert_eq!(h.meta.snapshot().nodes[0].state, NodeState::Ready);

        assert_eq!(r.reconcile().unwrap(), Outcome::NoChange);
        assert_eq!(h.runner.call_count(), 2);
    }

    #[test]
    fn test_new_entry_pnn_gap_rejected() {
        // A new entry must extend the file exactly; a gap aborts with
        // both files untouched.
        let h = Harness::new(
            vec![entry("node5", "10.0.0.6", 5, NodeState::New)],
            &["10.0.0.1"],
        );
        let before = h.meta.snapshot();
        let err = h.reconciler(5).reconcile().unwrap_err();

        assert!(matches!(err, KeeperError::UnexpectedPnn { pnn: 5, len: 1 }));
        assert_eq!(h.nodes_content(), "10.0.0.1\n");
        assert_eq!(h.meta.snapshot(), before);
        assert_eq!(h.runner.call_count(), 0);
    }

    #[test]
    fn test_ready_entry_missing_is_hard_error() {
        let h = Harness::new(vec![entry("node0", "10.0.0.1", 0, NodeState::Ready)], &[]);
        let before = h.meta.snapshot();
        let err = h.reconciler(0).reconcile().unwrap_err();

        assert!(matches!(err, KeeperError::ReadyNodeMissing { pnn: 0 }));
        assert_eq!(h.meta.snapshot(), before);
        assert_eq!(h.runner.call_count(), 0);
    }

    #[test]
    fn test_ready_entry_commented_is_hard_error() {
        // A disabled line does not satisfy a ready entry.
        let h = Harness::new(
            vec![entry("node0", "10.0.0.1", 0, NodeState::Ready)],
            &["#10.0.0.1"],
        );
        let err = h.reconciler(0).reconcile().unwrap_err();
        assert!(matches!(err, KeeperError::ReadyNodeMissing { pnn: 0 }));
    }

    #[test]
    fn test_admission() {
        let h = Harness::new(
            vec![
                entry("node0", "10.0.0.1", 0, NodeState::Ready),
                entry("node1", "10.0.0.2", 1, NodeState::New),
            ],
            &["10.0.0.1"],
        );
        // node0's address is an accepted line: admitted.
        assert!(h.reconciler(0).admitted().unwrap());
        // node1 has not been published yet: not admitted.
        assert!(!h.reconciler(1).admitted().unwrap());
        // No entry at all for pnn 7.
        assert!(!h.reconciler(7).admitted().unwrap());
    }

    #[test]
    fn test_admission_rejects_commented_line() {
        let h = Harness::new(
            vec![entry("node0", "10.0.0.1", 0, NodeState::Changed)],
            &["#10.0.0.1"],
        );
        assert!(!h.reconciler(0).admitted().unwrap());
    }

    #[test]
    fn test_reload_failure_retries_to_convergence() {
        // The nodes file is written before the reload runs; a reload
        // failure leaves the document un-advanced. The next cycle
        // re-derives the remaining work and retries the reload.
        let h = Harness::new(vec![entry("node0", "10.0.0.1", 0, NodeState::New)], &[]);
        let r = h.reconciler(0);

        h.runner.set_fail(true);
        let err = r.reconcile().unwrap_err();
        assert!(matches!(err, KeeperError::CommandFailed { .. }));
        assert_eq!(h.nodes_content(), "10.0.0.1\n");
        assert_eq!(h.meta.snapshot().nodes[0].state, NodeState::New);

        h.runner.set_fail(false);
        assert_eq!(r.reconcile().unwrap(), Outcome::Changed);
        assert_eq!(h.meta.snapshot().nodes[0].state, NodeState::Ready);
        assert_eq!(h.runner.call_count(), 2);
    }

    #[test]
    fn test_advance_only_entry_steps_state() {
        // The line already landed (say, written by a cycle that died
        // before persisting states); only the state machine moves.
        let h = Harness::new(
            vec![entry("node0", "10.0.0.1", 0, NodeState::New)],
            &["10.0.0.1"],
        );
        assert_eq!(h.reconciler(0).reconcile().unwrap(), Outcome::Changed);
        assert_eq!(h.meta.snapshot().nodes[0].state, NodeState::Ready);
        assert_eq!(h.nodes_content(), "10.0.0.1\n");
    }

    #[test]
    fn test_gone_entry_is_ignored() {
        let h = Harness::new(
            vec![
                entry("node0", "10.0.0.1", 0, NodeState::Ready),
                entry("node1", "10.0.0.2", 1, NodeState::Gone),
            ],
            &["10.0.0.1"],
        );
        assert_eq!(h.reconciler(0).reconcile().unwrap(), Outcome::NoChange);
        assert_eq!(h.runner.call_count(), 0);
    }

    #[test]
    fn test_mixed_pending_entries_in_one_pass() {
        // An established node plus two pending ones: one append, one
        // replacement publish, a single file write and reload.
        let h = Harness::new(
            vec![
                entry("node0", "10.0.0.1", 0, NodeState::Ready),
                entry("node1", "10.0.0.9", 1, NodeState::Replaced),
                entry("node2", "10.0.0.3", 2, NodeState::New),
            ],
            &["10.0.0.1", "#10.0.0.2"],
        );
        assert_eq!(h.reconciler(0).reconcile().unwrap(), Outcome::Changed);
        assert_eq!(h.nodes_content(), "10.0.0.1\n10.0.0.9\n10.0.0.3\n");
        assert_eq!(h.runner.call_count(), 1);

        let doc = h.meta.snapshot();
        assert!(doc.nodes.iter().all(|e| e.state == NodeState::Ready));
    }
}
