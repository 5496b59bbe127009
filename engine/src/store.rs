//! Remote store contract.
//!
//! The engine only needs three calls from an object store: a paginated
//! listing, a paginated metadata search, and a server-side copy of one
//! object. `RemoteStore` captures exactly that, so the pipeline can run
//! against `S3Client` in production and a scripted store in tests.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Acl, MetadataDirective, ObjectKey};

/// Marker returned by a metadata search once the last page has been served.
pub const NO_MORE_PAGES: &str = "NO MORE PAGES";

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys in ascending key order
    pub keys: Vec<ObjectKey>,
    /// More keys follow this page
    pub is_truncated: bool,
    /// Continuation marker, when the store supplies one
    pub next_marker: Option<String>,
}

impl ListPage {
    /// Marker for the request that follows this page.
    ///
    /// The greatest key of the page; the store's own marker is used only when
    /// the page carried no keys.
    pub fn continuation_marker(&self) -> Option<String> {
        self.keys
            .iter()
            .max()
            .map(|key| key.as_str().to_string())
            .or_else(|| self.next_marker.clone().filter(|m| !m.is_empty()))
    }
}

/// One page of a metadata search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPage {
    pub matches: Vec<ObjectKey>,
    /// Marker for the next call, `NO_MORE_PAGES` after the last one
    pub next_marker: String,
}

impl QueryPage {
    pub fn is_last(&self) -> bool {
        self.next_marker == NO_MORE_PAGES
    }
}

/// A single server-side copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub source_bucket: String,
    pub source_key: String,
    pub target_bucket: String,
    pub target_key: String,
    pub acl: Acl,
    pub directive: MetadataDirective,
}

/// The object store operations consumed by the copy pipeline.
///
/// Implementations are shared read-only between all concurrent copy tasks.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List up to `max_keys` keys of `bucket` starting with `prefix`, after `marker`.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        max_keys: u32,
    ) -> Result<ListPage, StoreError>;

    /// Run the metadata search `query` against `bucket`, resuming at `marker`.
    async fn query(
        &self,
        bucket: &str,
        query: &str,
        marker: &str,
        max_keys: u32,
    ) -> Result<QueryPage, StoreError>;

    /// Copy one object inside the store.
    async fn copy_object(&self, request: &CopyRequest) -> Result<(), StoreError>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory store used by the engine tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Everything the store saw, in arrival order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum StoreEvent {
        List { prefix: String, marker: String, max_keys: u32 },
        Query { query: String, marker: String, max_keys: u32 },
        CopyStarted(String),
        CopyFinished(String),
    }

    pub(crate) fn service_error(code: &str) -> StoreError {
        StoreError::Service {
            operation: "test",
            status: 500,
            code: code.to_string(),
            message: "scripted failure".to_string(),
        }
    }

    #[derive(Default)]
    pub(crate) struct ScriptedStore {
        list_pages: Mutex<VecDeque<Result<ListPage, StoreError>>>,
        query_pages: Mutex<VecDeque<Result<QueryPage, StoreError>>>,
        /// Remaining failing attempts per source key
        failures: Mutex<HashMap<String, u32>>,
        events: Mutex<Vec<StoreEvent>>,
        copies: Mutex<Vec<CopyRequest>>,
        copy_delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedStore {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_copy_delay(mut self, delay: Duration) -> Self {
            self.copy_delay = delay;
            self
        }

        pub(crate) fn push_list_page(&self, keys: &[&str], is_truncated: bool) {
            self.list_pages.lock().unwrap().push_back(Ok(ListPage {
                keys: keys.iter().map(|k| ObjectKey::from(*k)).collect(),
                is_truncated,
                next_marker: None,
            }));
        }

        pub(crate) fn push_list_result(&self, result: Result<ListPage, StoreError>) {
            self.list_pages.lock().unwrap().push_back(result);
        }

        pub(crate) fn push_query_page(&self, matches: &[&str], next_marker: &str) {
            self.query_pages.lock().unwrap().push_back(Ok(QueryPage {
                matches: matches.iter().map(|k| ObjectKey::from(*k)).collect(),
                next_marker: next_marker.to_string(),
            }));
        }

        pub(crate) fn push_query_result(&self, result: Result<QueryPage, StoreError>) {
            self.query_pages.lock().unwrap().push_back(result);
        }

        /// Make the next `attempts` copies of `key` fail.
        pub(crate) fn fail_copies(&self, key: &str, attempts: u32) {
            self.failures.lock().unwrap().insert(key.to_string(), attempts);
        }

        pub(crate) fn events(&self) -> Vec<StoreEvent> {
            self.events.lock().unwrap().clone()
        }

        pub(crate) fn copies(&self) -> Vec<CopyRequest> {
            self.copies.lock().unwrap().clone()
        }

        pub(crate) fn copy_attempts(&self, key: &str) -> usize {
            self.copies
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.source_key == key)
                .count()
        }

        pub(crate) fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        fn record(&self, event: StoreEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl RemoteStore for ScriptedStore {
        async fn list(
            &self,
            _bucket: &str,
            prefix: &str,
            marker: &str,
            max_keys: u32,
        ) -> Result<ListPage, StoreError> {
            self.record(StoreEvent::List {
                prefix: prefix.to_string(),
                marker: marker.to_string(),
                max_keys,
            });
            self.list_pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ListPage::default()))
        }

        async fn query(
            &self,
            _bucket: &str,
            query: &str,
            marker: &str,
            max_keys: u32,
        ) -> Result<QueryPage, StoreError> {
            self.record(StoreEvent::Query {
                query: query.to_string(),
                marker: marker.to_string(),
                max_keys,
            });
            self.query_pages.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(QueryPage {
                    matches: Vec::new(),
                    next_marker: NO_MORE_PAGES.to_string(),
                })
            })
        }

        async fn copy_object(&self, request: &CopyRequest) -> Result<(), StoreError> {
            if request.source_key == "panic" {
                panic!("scripted panic while copying");
            }

            self.record(StoreEvent::CopyStarted(request.source_key.clone()));
            self.copies.lock().unwrap().push(request.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.copy_delay.is_zero() {
                tokio::time::sleep(self.copy_delay).await;
            }

            let fail = {
                let mut failures = self.failures.lock().unwrap();
                match failures.get_mut(&request.source_key) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.record(StoreEvent::CopyFinished(request.source_key.clone()));

            if fail {
                Err(service_error("InternalError"))
            } else {
                Ok(())
            }
        }
    }
}
