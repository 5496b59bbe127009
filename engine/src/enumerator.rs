//! Page-by-page discovery of the objects to copy.
//!
//! The source bucket is walked either with a prefix listing or, when a
//! metadata search query is configured, with the store's query API. Both
//! strategies advance an explicit `PageCursor` in a loop; `next_page`
//! returns `Ok(None)` once the store reports the end.

use tracing::debug;

use crate::error::EngineError;
use crate::model::{CopyJobConfig, ObjectKey, PageCursor};
use crate::store::RemoteStore;

/// How the source bucket is walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// List keys under a prefix; continue while the listing is truncated
    Listing { prefix: String },
    /// Page through a metadata search until the store returns the sentinel marker
    Query { query: String },
}

impl Strategy {
    /// Query mode when the config carries a search expression, listing otherwise.
    pub fn for_config(config: &CopyJobConfig) -> Self {
        match config.search_query() {
            Some(query) => Strategy::Query {
                query: query.to_string(),
            },
            None => Strategy::Listing {
                prefix: config.source_prefix.clone(),
            },
        }
    }
}

/// Produces successive pages of keys from the source bucket.
#[derive(Debug)]
pub struct Enumerator {
    bucket: String,
    page_size: u32,
    strategy: Strategy,
    cursor: PageCursor,
}

impl Enumerator {
    pub fn new(config: &CopyJobConfig) -> Self {
        Enumerator {
            bucket: config.source_bucket.clone(),
            page_size: config.page_size,
            strategy: Strategy::for_config(config),
            cursor: PageCursor::Start,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Fetch the next page.
    ///
    /// Returns `Ok(None)` once enumeration is exhausted. A returned page may be
    /// empty when the store sent an empty page that was not the last one. Any
    /// store failure is returned as a fatal enumeration error and leaves the
    /// cursor untouched.
    pub async fn next_page(
        &mut self,
        store: &dyn RemoteStore,
    ) -> Result<Option<Vec<ObjectKey>>, EngineError> {
        if self.cursor.is_exhausted() {
            return Ok(None);
        }

        let marker = self.cursor.marker().to_string();
        let (keys, next) = match &self.strategy {
            Strategy::Listing { prefix } => {
                let page = store
                    .list(&self.bucket, prefix, &marker, self.page_size)
                    .await
                    .map_err(|source| EngineError::ListingFailed {
                        bucket: self.bucket.clone(),
                        source,
                    })?;
                debug!(
                    bucket = %self.bucket,
                    marker = %marker,
                    keys = page.keys.len(),
                    truncated = page.is_truncated,
                    "listed page"
                );

                let next = if !page.is_truncated {
                    PageCursor::Exhausted
                } else {
                    match page.continuation_marker() {
                        Some(next_marker) => PageCursor::After(next_marker),
                        None => {
                            return Err(EngineError::StalledListing {
                                bucket: self.bucket.clone(),
                                marker,
                            })
                        }
                    }
                };
                (page.keys, next)
            }
            Strategy::Query { query } => {
                let page = store
                    .query(&self.bucket, query, &marker, self.page_size)
                    .await
                    .map_err(|source| EngineError::QueryFailed {
                        bucket: self.bucket.clone(),
                        source,
                    })?;
                debug!(
                    bucket = %self.bucket,
                    marker = %marker,
                    matches = page.matches.len(),
                    next_marker = %page.next_marker,
                    "queried page"
                );

                let next = if page.is_last() {
                    PageCursor::Exhausted
                } else {
                    PageCursor::After(page.next_marker)
                };
                (page.matches, next)
            }
        };

        self.cursor = next;
        Ok(Some(keys))
    }
}
