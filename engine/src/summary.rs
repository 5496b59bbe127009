//! Run counters and the end-of-run summary.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

#[derive(Debug, Default)]
struct Counters {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Outcome tallies shared by every copy task of a run.
///
/// Cloning is cheap and every clone updates the same counts. Counts only grow.
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    inner: Arc<Counters>,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempted(&self) {
        self.inner.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.inner.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempted(&self) -> u64 {
        self.inner.attempted.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.inner.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Freeze the current counts together with the elapsed run time.
    pub fn snapshot(&self, elapsed: Duration) -> RunSummary {
        RunSummary {
            attempted: self.attempted(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            elapsed,
        }
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Attempted operations divided by elapsed seconds, 0 for an instant run.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.attempted as f64 / secs
        } else {
            0.0
        }
    }

    /// Every attempted copy reached exactly one terminal outcome.
    pub fn is_balanced(&self) -> bool {
        self.attempted == self.succeeded + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Emit the four summary lines.
    pub fn log(&self) {
        info!(
            "{} operations executed in {:.6} seconds",
            self.attempted,
            self.elapsed.as_secs_f64()
        );
        info!("{:.6} operations per second", self.ops_per_second());
        info!("{} operations succeeded", self.succeeded);
        info!("{} operations failed", self.failed);
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempted, {} succeeded, {} failed in {:.3}s ({:.2} ops/s)",
            self.attempted,
            self.succeeded,
            self.failed,
            self.elapsed.as_secs_f64(),
            self.ops_per_second()
        )
    }
}
