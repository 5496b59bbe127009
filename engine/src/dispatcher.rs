//! Fan-out of a batch into concurrent copy tasks.
//!
//! Every dispatched task holds a `BarrierGuard`; dropping the guard marks the
//! task as finished. The job waits on the batch's `CompletionBarrier` before
//! asking the enumerator for the next page, so at most one page of objects is
//! in flight at any time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};
use tracing::debug;

use crate::copy_task::run_copy_task;
use crate::model::{Batch, Operation};
use crate::progress::ProgressCallback;
use crate::store::RemoteStore;
use crate::summary::RunCounters;

#[derive(Debug, Default)]
struct BarrierState {
    outstanding: AtomicUsize,
    notify: Notify,
}

/// Counts the tasks of one batch that have not finished yet.
#[derive(Debug, Clone, Default)]
pub struct CompletionBarrier {
    state: Arc<BarrierState>,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one more task. The task must hold the guard until it is done.
    pub fn register(&self) -> BarrierGuard {
        self.state.outstanding.fetch_add(1, Ordering::AcqRel);
        BarrierGuard {
            state: Arc::clone(&self.state),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.state.outstanding.load(Ordering::Acquire)
    }

    /// Wait until every registered task has dropped its guard.
    pub async fn wait(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Held by a running task; releases one unit of the barrier when dropped.
///
/// Dropping also happens while unwinding, so a panicking task still releases
/// its batch.
#[derive(Debug)]
pub struct BarrierGuard {
    state: Arc<BarrierState>,
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        if self.state.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.notify.notify_waiters();
        }
    }
}

/// Turns batches into copy tasks.
pub struct Dispatcher {
    store: Arc<dyn RemoteStore>,
    counters: RunCounters,
    limiter: Option<Arc<Semaphore>>,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl Dispatcher {
    /// `max_concurrency` caps the copies running at once across a batch;
    /// `None` starts every copy of a batch immediately.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        counters: RunCounters,
        max_concurrency: Option<usize>,
    ) -> Self {
        Dispatcher {
            store,
            counters,
            limiter: max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<Arc<dyn ProgressCallback>>) -> Self {
        self.progress = progress;
        self
    }

    /// Start one task per key of `batch` and return the barrier to wait on.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, batch: Batch) -> CompletionBarrier {
        let barrier = CompletionBarrier::new();
        debug!(keys = batch.len(), operation = %batch.operation, "dispatching batch");

        for key in batch.keys {
            let guard = barrier.register();
            let store = Arc::clone(&self.store);
            let config = Arc::clone(&batch.config);
            let counters = self.counters.clone();
            let limiter = self.limiter.clone();
            let progress = self.progress.clone();

            match batch.operation {
                Operation::Copy { acl, directive } => {
                    tokio::spawn(async move {
                        let _guard = guard;
                        let _permit = match limiter {
                            Some(limiter) => limiter.acquire_owned().await.ok(),
                            None => None,
                        };

                        let outcome =
                            run_copy_task(store.as_ref(), &config, &key, acl, directive, &counters)
                                .await;

                        if let Some(progress) = progress {
                            progress.on_object_completed(&key, &outcome);
                        }
                    });
                }
            }
        }

        barrier
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::copy_task::CopyOutcome;
    use crate::model::{CopyJob, CopyJobConfig, ObjectKey};
    use crate::store::mock::ScriptedStore;

    fn batch(keys: &[&str]) -> Batch {
        let mut config = CopyJobConfig::new("src", "dst");
        config.target_prefix = "copy/".to_string();
        Batch::new(keys.iter().map(|k| ObjectKey::from(*k)).collect(), Arc::new(config))
    }

    struct RecordingProgress {
        completed: Mutex<Vec<(String, bool)>>,
    }

    impl ProgressCallback for RecordingProgress {
        fn on_job_started(&self, _job: &CopyJob) {}
        fn on_page_fetched(&self, _job: &CopyJob, _keys: usize) {}
        fn on_object_completed(&self, key: &ObjectKey, outcome: &CopyOutcome) {
            self.completed
                .lock()
                .unwrap()
                .push((key.to_string(), outcome.is_success()));
        }
        fn on_batch_completed(&self, _job: &CopyJob, _batch_size: usize) {}
        fn on_job_completed(&self, _job: &CopyJob) {}
    }

    #[tokio::test]
    async fn test_empty_barrier_does_not_block() {
        let barrier = CompletionBarrier::new();
        barrier.wait().await;
        assert_eq!(barrier.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_barrier_waits_for_every_guard() {
        let barrier = CompletionBarrier::new();
        let first = barrier.register();
        let second = barrier.register();
        assert_eq!(barrier.outstanding(), 2);

        drop(first);
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("barrier never released")
            .expect("waiter panicked");
        assert_eq!(barrier.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_copies_every_key() {
        let store = Arc::new(ScriptedStore::new());
        let counters = RunCounters::new();
        let dispatcher = Dispatcher::new(store.clone(), counters.clone(), None);

        let barrier = dispatcher.dispatch(batch(&["a", "b", "c"]));
        barrier.wait().await;

        assert_eq!(barrier.outstanding(), 0);
        let mut targets: Vec<_> = store.copies().into_iter().map(|c| c.target_key).collect();
        targets.sort();
        assert_eq!(targets, vec!["copy/a", "copy/b", "copy/c"]);
        assert_eq!(counters.attempted(), 3);
        assert_eq!(counters.succeeded(), 3);
    }

    #[tokio::test]
    async fn test_failed_copies_still_release_barrier() {
        let store = Arc::new(ScriptedStore::new());
        store.fail_copies("b", u32::MAX);
        let counters = RunCounters::new();
        let progress = Arc::new(RecordingProgress {
            completed: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(store.clone(), counters.clone(), None)
            .with_progress(Some(progress.clone() as Arc<dyn ProgressCallback>));

        dispatcher.dispatch(batch(&["a", "b"])).wait().await;

        assert_eq!(counters.succeeded(), 1);
        assert_eq!(counters.failed(), 1);
        let mut completed = progress.completed.lock().unwrap().clone();
        completed.sort();
        assert_eq!(
            completed,
            vec![("a".to_string(), true), ("b".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_panicking_task_releases_barrier() {
        let store = Arc::new(ScriptedStore::new());
        let dispatcher = Dispatcher::new(store, RunCounters::new(), None);

        let barrier = dispatcher.dispatch(batch(&["panic", "a"]));
        tokio::time::timeout(Duration::from_secs(5), barrier.wait())
            .await
            .expect("barrier never released after panic");
    }

    #[tokio::test]
    async fn test_whole_page_runs_concurrently_by_default() {
        let store = Arc::new(ScriptedStore::new().with_copy_delay(Duration::from_millis(50)));
        let dispatcher = Dispatcher::new(store.clone(), RunCounters::new(), None);

        dispatcher.dispatch(batch(&["a", "b", "c", "d"])).wait().await;
        assert_eq!(store.max_in_flight(), 4);
    }

    #[tokio::test]
    async fn test_concurrency_cap_limits_in_flight_copies() {
        let store = Arc::new(ScriptedStore::new().with_copy_delay(Duration::from_millis(20)));
        let dispatcher = Dispatcher::new(store.clone(), RunCounters::new(), Some(2));

        dispatcher.dispatch(batch(&["a", "b", "c", "d", "e"])).wait().await;
        assert!(store.max_in_flight() <= 2);
        assert_eq!(store.copies().len(), 5);
    }
}
