//! Operational defaults for the keeper agent.
//!
//! These are the paths and tunables a containerized deployment can
//! override via CLI flags; the hardcoded fallbacks match the standard
//! CTDB filesystem layout.

/// Canonical location of the CTDB nodes file.
pub const DEFAULT_NODES_PATH: &str = "/etc/ctdb/nodes";

/// Default location of the shared membership document. This must live
/// on a filesystem mounted into every agent's container.
pub const DEFAULT_META_PATH: &str = "/var/lib/ctdb/shared/nodes.json";

/// Consecutive-failure ceiling for the convergence loop. Past this
/// many failed cycles in a row the loop re-raises instead of retrying.
pub const DEFAULT_ERROR_LIMIT: u32 = 10;

// ---- Backoff schedule ----
//
// The waiter sleeps SHORT_STEP seconds per cycle until SHORT_TOTAL
// seconds have accumulated, then MID_STEP until LONG_TOTAL, then
// LONG_STEP forever. Clusters churn right after startup and settle
// down afterward, so polling tapers off.

/// Accumulated seconds after which the short sleep step is abandoned.
pub const BACKOFF_SHORT_TOTAL_SECS: u64 = 10;

/// Accumulated seconds after which the middle sleep step is abandoned.
pub const BACKOFF_LONG_TOTAL_SECS: u64 = 120;

/// Sleep step while the cluster is settling (seconds).
pub const BACKOFF_SHORT_STEP_SECS: u64 = 1;

/// Intermediate sleep step (seconds).
pub const BACKOFF_MID_STEP_SECS: u64 = 5;

/// Steady-state sleep step (seconds).
pub const BACKOFF_LONG_STEP_SECS: u64 = 60;

/// Slice length used while sleeping so cancellation is noticed
/// promptly (milliseconds).
pub const CANCEL_POLL_INTERVAL_MS: u64 = 100;
