//! # keeper-core
//!
//! Core library for the ctdb-keeper agent: the locked JSON membership
//! store, CTDB nodes-file I/O, external command execution, and the
//! node-membership reconciler with its convergence loop.
//!
//! The unit of concurrency here is the OS process. Several agents, one
//! per cluster node, run the same reconciler against the same shared
//! files; exclusive advisory file locks are the only synchronization
//! primitive between them.

pub mod cmd;
pub mod jstore;
pub mod meta;
pub mod monitor;
pub mod nodes_file;
pub mod reconcile;

// Re-export commonly used types at the crate root
pub use cmd::{CommandConfig, CommandRunner, SystemCommandRunner};
pub use jstore::{ClusterMeta, JsonFileMeta, MemoryMeta, MetaHandle, OpenMode};
pub use meta::RefreshOutcome;
pub use monitor::{CancelFlag, ConvergenceLoop, SleepWaiter, Waiter};
pub use reconcile::{Outcome, Reconciler};
