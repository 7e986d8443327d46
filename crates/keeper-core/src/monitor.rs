//! Convergence supervision: waiters, backoff, and the polling loop.
//!
//! The loop itself is deliberately blocking; one agent process per
//! cluster node runs exactly one of these. All cross-process
//! synchronization happens inside the reconciler's lock cycle, never
//! across the pause between cycles, so worst-case staleness is
//! bounded by one poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use keeper_proto::defaults::{
    BACKOFF_LONG_STEP_SECS, BACKOFF_LONG_TOTAL_SECS, BACKOFF_MID_STEP_SECS,
    BACKOFF_SHORT_STEP_SECS, BACKOFF_SHORT_TOTAL_SECS, CANCEL_POLL_INTERVAL_MS,
};
use keeper_proto::error::{KeeperError, KeeperResult};

use crate::reconcile::{Outcome, Reconciler};

/// Cooperative cancellation flag, shared between the convergence loop
/// and whatever handles shutdown signals.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pauses between convergence cycles.
pub trait Waiter {
    /// Block until the next cycle should run. Returns
    /// [`KeeperError::Interrupted`] when cancelled mid-wait.
    fn wait(&mut self) -> KeeperResult<()>;

    /// Note that the last cycle changed something; any backoff resets
    /// so follow-up work is picked up quickly.
    fn acted(&mut self);
}

/// Sleeps on a settling schedule: short sleeps while the cluster finds
/// its feet, long ones once things are steady.
pub struct SleepWaiter {
    cancel: CancelFlag,
    total: u64,
}

impl SleepWaiter {
    pub fn new(cancel: CancelFlag) -> Self {
        Self { cancel, total: 0 }
    }

    fn next_sleep(&mut self) -> u64 {
        let secs = if self.total > BACKOFF_LONG_TOTAL_SECS {
            BACKOFF_LONG_STEP_SECS
        } else if self.total > BACKOFF_SHORT_TOTAL_SECS {
            BACKOFF_MID_STEP_SECS
        } else {
            BACKOFF_SHORT_STEP_SECS
        };
        self.total += secs;
        secs
    }
}

impl Waiter for SleepWaiter {
    fn wait(&mut self) -> KeeperResult<()> {
        let secs = self.next_sleep();
        let deadline = Instant::now() + Duration::from_secs(secs);
        // Sleep in slices so a cancellation is noticed promptly.
        loop {
            if self.cancel.is_cancelled() {
                return Err(KeeperError::Interrupted);
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(CANCEL_POLL_INTERVAL_MS));
        }
    }

    fn acted(&mut self) {
        self.total = 0;
    }
}

/// Polling supervisor that repeatedly drives a [`Reconciler`].
///
/// Cancellation propagates immediately. Any other failure is logged,
/// counted, and retried after the pause; past `error_limit`
/// consecutive failures the error is re-raised so the supervising
/// process restarts the agent instead of letting it spin forever on a
/// persistent fault. A successful cycle resets the counter.
pub struct ConvergenceLoop<'a> {
    reconciler: Reconciler<'a>,
    waiter: &'a mut dyn Waiter,
    error_limit: u32,
}

impl<'a> ConvergenceLoop<'a> {
    pub fn new(
        reconciler: Reconciler<'a>,
        waiter: &'a mut dyn Waiter,
        error_limit: u32,
    ) -> Self {
        Self {
            reconciler,
            waiter,
            error_limit,
        }
    }

    /// Run until cancelled ([`KeeperError::Interrupted`]) or the
    /// failure ceiling is hit.
    pub fn run(mut self) -> KeeperResult<()> {
        let mut errors: u32 = 0;
        loop {
            match self.cycle() {
                Ok(changed) => {
                    errors = 0;
                    if changed {
                        self.waiter.acted();
                    }
                }
                Err(KeeperError::Interrupted) => return Err(KeeperError::Interrupted),
                Err(err) => {
                    errors += 1;
                    error!("error during convergence cycle: {} (count={})", err, errors);
                    if errors > self.error_limit {
                        error!("too many retries ({}), giving up", errors);
                        return Err(err);
                    }
                }
            }
            self.waiter.wait()?;
        }
    }

    fn cycle(&self) -> KeeperResult<bool> {
        info!("checking if node is able to make updates");
        if !self.reconciler.admitted()? {
            warn!("node can not make updates");
            return Ok(false);
        }
        info!("checking for node updates");
        let outcome = self.reconciler.reconcile()?;
        if outcome == Outcome::Changed {
            info!("updated nodes");
        }
        Ok(outcome == Outcome::Changed)
    }
}
