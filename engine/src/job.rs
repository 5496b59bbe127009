//! Job orchestration module.
//!
//! This module provides the job lifecycle functions:
//! - Creating a job from a validated configuration
//! - Running a job: enumerate a page, dispatch it, wait for it, repeat

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::enumerator::{Enumerator, Strategy};
use crate::error::EngineError;
use crate::model::{Batch, CopyJob, CopyJobConfig, JobState};
use crate::progress::ProgressCallback;
use crate::store::RemoteStore;
use crate::summary::{RunCounters, RunSummary};

/// Create a new copy job.
///
/// Validates the configuration; no request is sent to the store.
///
/// # Errors
/// Returns `EngineError::InvalidConfig` when a bucket name is empty, the page
/// size is zero, or the concurrency cap is zero.
pub fn create_job(config: CopyJobConfig) -> Result<CopyJob, EngineError> {
    if config.source_bucket.trim().is_empty() {
        return Err(EngineError::InvalidConfig {
            reason: "source bucket is empty".to_string(),
        });
    }

    if config.target_bucket.trim().is_empty() {
        return Err(EngineError::InvalidConfig {
            reason: "target bucket is empty".to_string(),
        });
    }

    if config.page_size == 0 {
        return Err(EngineError::InvalidConfig {
            reason: "page size must be at least 1".to_string(),
        });
    }

    if config.max_concurrency == Some(0) {
        return Err(EngineError::InvalidConfig {
            reason: "max concurrency must be at least 1".to_string(),
        });
    }

    // Copies land under the listed prefix, so later pages can list them again.
    if relists_own_copies(&config) {
        warn!(
            bucket = %config.source_bucket,
            target_prefix = %config.target_prefix,
            "copies are written under the listed prefix and may be listed again"
        );
    }

    Ok(CopyJob {
        id: Uuid::new_v4(),
        config: Arc::new(config),
        state: JobState::Pending,
        counters: RunCounters::new(),
        pages_fetched: 0,
        batches_dispatched: 0,
        created_at: Utc::now(),
        start_time: None,
        end_time: None,
    })
}

/// True when a prefix listing of the source would also return the copies.
///
/// An in-place copy (same bucket, no target prefix) rewrites each key onto
/// itself and never produces a new key, so it does not count.
fn relists_own_copies(config: &CopyJobConfig) -> bool {
    config.search_query().is_none()
        && config.source_bucket == config.target_bucket
        && !config.target_prefix.is_empty()
        && config.target_prefix.starts_with(&config.source_prefix)
}

/// Run a job to completion.
///
/// Pages are strictly sequential: the next page is requested only after
/// every copy of the current page has finished. Individual copy failures are
/// counted but do NOT stop the job.
///
/// # Errors
/// Returns the enumeration error that aborted the run. The job is then in
/// `Aborted` state and `job.summary()` still reports what was copied.
pub async fn run_job(
    job: &mut CopyJob,
    store: Arc<dyn RemoteStore>,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<RunSummary, EngineError> {
    if job.state != JobState::Pending {
        return Err(EngineError::InvalidState {
            expected: JobState::Pending,
            actual: job.state,
        });
    }

    let span = info_span!("copy_job", job_id = %job.id);
    let result = drive(job, store, progress.clone()).instrument(span).await;

    job.end_time = Some(Instant::now());
    job.state = match &result {
        Ok(()) => JobState::Completed,
        Err(_) => JobState::Aborted,
    };

    if let Some(progress) = &progress {
        progress.on_job_completed(job);
    }

    result.map(|()| job.summary())
}

async fn drive(
    job: &mut CopyJob,
    store: Arc<dyn RemoteStore>,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<(), EngineError> {
    job.state = JobState::Running;
    job.start_time = Some(Instant::now());

    if let Some(progress) = &progress {
        progress.on_job_started(job);
    }

    let mut enumerator = Enumerator::new(&job.config);
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        job.counters.clone(),
        job.config.max_concurrency,
    )
    .with_progress(progress.clone());

    while !enumerator.cursor().is_exhausted() {
        let marker = enumerator.cursor().marker();
        match enumerator.strategy() {
            Strategy::Listing { prefix } => info!(
                bucket = %job.config.source_bucket,
                prefix = %prefix,
                marker = %marker,
                "Start listing"
            ),
            Strategy::Query { query } => info!(
                bucket = %job.config.source_bucket,
                query = %query,
                marker = %marker,
                "Start querying"
            ),
        }

        let Some(keys) = enumerator.next_page(store.as_ref()).await? else {
            break;
        };
        job.pages_fetched += 1;
        if let Some(progress) = &progress {
            progress.on_page_fetched(job, keys.len());
        }

        if keys.is_empty() {
            continue;
        }

        let batch = Batch::new(keys, Arc::clone(&job.config));
        let batch_size = batch.len();
        job.batches_dispatched += 1;

        dispatcher.dispatch(batch).wait().await;
        debug!(
            page = job.pages_fetched,
            keys = batch_size,
            attempted = job.counters.attempted(),
            "batch finished"
        );

        if let Some(progress) = &progress {
            progress.on_batch_completed(job, batch_size);
        }
    }

    Ok(())
}
