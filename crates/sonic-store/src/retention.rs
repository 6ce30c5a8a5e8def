//! Periodic retention sweep.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::store::LogDatabase;

/// Default number of rows kept by the sweep.
pub const DEFAULT_MAX_ROWS: u64 = 100_000;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// How much history to keep and how often to enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Rows kept after each sweep.
    pub max_rows: u64,
    /// Time between sweeps.
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl RetentionPolicy {
    /// Sets the number of rows to keep.
    #[must_use]
    pub const fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Spawns a task that sweeps `db` on every `policy.interval` tick.
///
/// The first sweep happens one interval after spawning. Failures are logged
/// and the task keeps running until aborted.
pub fn spawn_retention(db: LogDatabase, policy: RetentionPolicy) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if db.is_closed() {
                break;
            }
            match db.sweep(policy.max_rows).await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, max_rows = policy.max_rows, "retention sweep removed old rows"),
                Err(e) => warn!(error = %e, "retention sweep failed"),
            }
        }
    })
}
