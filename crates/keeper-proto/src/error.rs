/// Keeper error types.
///
/// A single enum covers every failure the agent can hit, in three
/// broad bands: membership-document misuse (duplicates, conflicts),
/// hard invariant violations the agent cannot repair, and plumbing
/// (I/O, JSON, external commands). "Entry not found" on a refresh is
/// deliberately NOT an error; it is a recoverable outcome returned by
/// the operation itself.
use thiserror::Error;

/// Unified error type for all keeper operations.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// An add would create a second entry with this pnn.
    #[error("duplicate pnn {0} in membership document")]
    DuplicatePnn(u32),

    /// An add would create a second entry with this identity.
    #[error("duplicate identity {0:?} in membership document")]
    DuplicateIdentity(String),

    /// A refresh found the pnn slot held by a different identity.
    #[error("pnn {pnn} already claimed by identity {identity:?}")]
    PnnConflict { pnn: u32, identity: String },

    /// A ready entry's address is no longer at its pnn line in the
    /// nodes file. Confirmed-stable state has gone missing; the agent
    /// makes no changes when this is detected.
    #[error("ready node (pnn {pnn}) missing from nodes file")]
    ReadyNodeMissing { pnn: u32 },

    /// A pending entry does not fit the nodes file: a new entry whose
    /// pnn is not exactly the current file length (append-only growth
    /// violated), or a changed/replaced entry pointing past the end.
    #[error("entry pnn {pnn} does not fit nodes file of {len} line(s)")]
    UnexpectedPnn { pnn: u32, len: usize },

    /// An external command exited nonzero (or could not be spawned
    /// from an empty argv).
    #[error("command {command:?} failed with exit code {code:?}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
    },

    /// The convergence loop was cancelled cooperatively.
    #[error("interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for keeper operations.
pub type KeeperResult<T> = Result<T, KeeperError>;
