/// Membership document types.
///
/// The shared membership document is the JSON side-channel that tracks
/// desired cluster membership independently of the CTDB daemon's own
/// nodes file. Every agent process reads and writes the same document.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a membership entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Just added; its address has never been written to the nodes file.
    New,
    /// Confirmed present, uncommented, at its pnn line.
    Ready,
    /// Address changed; the old line must be disabled first.
    Changed,
    /// Old line disabled; the new address may now be published.
    Replaced,
    /// Reserved for future removal support; never produced today.
    Gone,
}

impl NodeState {
    /// Advance the state machine one step after a confirmed write.
    ///
    /// A new entry has nothing to reconcile against, so a single
    /// successful write makes it ready. A changed entry must not
    /// replace a live address in one step: its slot is first disabled
    /// in place (replaced), and only the following pass publishes the
    /// new address.
    pub fn next(self) -> NodeState {
        match self {
            NodeState::New => NodeState::Ready,
            NodeState::Changed => NodeState::Replaced,
            NodeState::Replaced => NodeState::Ready,
            NodeState::Ready => NodeState::Ready,
            NodeState::Gone => NodeState::Gone,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::New => "new",
            NodeState::Ready => "ready",
            NodeState::Changed => "changed",
            NodeState::Replaced => "replaced",
            NodeState::Gone => "gone",
        };
        write!(f, "{}", name)
    }
}

/// One desired cluster member in the membership document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Globally unique identity of the member (hostname, uuid, ...).
    pub identity: String,
    /// IP address CTDB should use for this member.
    pub node: String,
    /// Position of the member in the physical nodes file.
    pub pnn: u32,
    /// Where the entry is in its reconciliation lifecycle.
    pub state: NodeState,
}

/// The membership document: an unordered collection of entries in
/// which both the `identity` and `pnn` key spaces must stay unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMetaDoc {
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
}

impl ClusterMetaDoc {
    /// Find the entry occupying the given pnn slot, if any.
    pub fn entry_for_pnn(&self, pnn: u32) -> Option<&NodeEntry> {
        self.nodes.iter().find(|e| e.pnn == pnn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert_eq!(NodeState::New.next(), NodeState::Ready);
        assert_eq!(NodeState::Changed.next(), NodeState::Replaced);
        assert_eq!(NodeState::Replaced.next(), NodeState::Ready);
        assert_eq!(NodeState::Ready.next(), NodeState::Ready);
        assert_eq!(NodeState::Gone.next(), NodeState::Gone);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&NodeState::New).unwrap(), "\"new\"");
        assert_eq!(
            serde_json::to_string(&NodeState::Replaced).unwrap(),
            "\"replaced\""
        );
        let state: NodeState = serde_json::from_str("\"changed\"").unwrap();
        assert_eq!(state, NodeState::Changed);
    }

    #[test]
    fn test_doc_parses_wire_shape() {
        let doc: ClusterMetaDoc = serde_json::from_str(
            r#"{"nodes":[{"identity":"node0","node":"10.0.0.1","pnn":0,"state":"new"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.nodes.len(), 1);
        assert_eq!(doc.nodes[0].identity, "node0");
        assert_eq!(doc.nodes[0].node, "10.0.0.1");
        assert_eq!(doc.nodes[0].pnn, 0);
        assert_eq!(doc.nodes[0].state, NodeState::New);
    }

    #[test]
    fn test_doc_missing_nodes_key_is_empty() {
        let doc: ClusterMetaDoc = serde_json::from_str("{}").unwrap();
        assert!(doc.nodes.is_empty());
    }

    #[test]
    fn test_entry_for_pnn() {
        let doc: ClusterMetaDoc = serde_json::from_str(
            r#"{"nodes":[
                {"identity":"a","node":"10.0.0.1","pnn":0,"state":"ready"},
                {"identity":"b","node":"10.0.0.2","pnn":1,"state":"new"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(doc.entry_for_pnn(1).unwrap().identity, "b");
        assert!(doc.entry_for_pnn(7).is_none());
    }
}
