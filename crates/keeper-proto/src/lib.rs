//! # keeper-proto
//!
//! Shared types for the ctdb-keeper agent: the membership document
//! model, the node lifecycle state machine, the unified error enum,
//! and operational defaults.
//!
//! Everything here is pure data; all I/O lives in `keeper-core`.

pub mod defaults;
pub mod error;
pub mod node;

// Re-export commonly used types at the crate root
pub use error::{KeeperError, KeeperResult};
pub use node::{ClusterMetaDoc, NodeEntry, NodeState};
