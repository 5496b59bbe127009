//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which decouples the copy
//! engine from how progress is shown (log lines in the CLI, counters in tests).

use crate::copy_task::CopyOutcome;
use crate::model::{CopyJob, ObjectKey};

/// Trait for receiving progress updates from a copy job.
///
/// `on_object_completed` is called from the copy tasks themselves, possibly
/// from several worker threads at once. All other methods are called from the
/// task driving the job.
pub trait ProgressCallback: Send + Sync {
    /// Called once, before the first page is requested.
    fn on_job_started(&self, job: &CopyJob);

    /// Called after every successful enumeration call, including empty pages.
    fn on_page_fetched(&self, job: &CopyJob, keys: usize);

    /// Called when a single object reached its terminal outcome.
    fn on_object_completed(&self, key: &ObjectKey, outcome: &CopyOutcome);

    /// Called when every copy of a batch has finished.
    fn on_batch_completed(&self, job: &CopyJob, batch_size: usize);

    /// Called when the run ends, whether it completed or aborted.
    fn on_job_completed(&self, job: &CopyJob);
}
