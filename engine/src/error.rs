//! Error types for the copy engine.
//!
//! Two layers of errors exist:
//! - `StoreError`: a single remote operation (list, query, copy) failed.
//! - `EngineError`: a job-level failure that stops the run.
//!
//! Per-object copy failures are never surfaced as `EngineError`. They are
//! retried inside the copy task and then absorbed into the run counters.

use thiserror::Error;

use crate::model::JobState;

/// Failure of a single call against the remote object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The request never produced an HTTP response (DNS, TLS, connection reset...)
    #[error("{operation} request failed")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The store answered with an error document or a non-success status.
    #[error("{operation} rejected by store (HTTP {status}): {code}: {message}")]
    Service {
        operation: &'static str,
        status: u16,
        code: String,
        message: String,
    },

    /// The response body could not be understood.
    #[error("malformed {operation} response: {reason}")]
    MalformedResponse {
        operation: &'static str,
        reason: String,
    },

    /// The request path cannot be sent as signed.
    #[error("cannot send {operation} request for '{path}': {reason}")]
    MalformedRequest {
        operation: &'static str,
        path: String,
        reason: String,
    },

    /// The configured endpoint is not a usable URL.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Errors that stop a copy job.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The job configuration is unusable
    #[error("invalid job configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The job was asked to do something its current state does not allow
    #[error("job must be in {expected:?} state; current state: {actual:?}")]
    InvalidState { expected: JobState, actual: JobState },

    /// Listing a page of the source bucket failed
    #[error("failed to list bucket '{bucket}'")]
    ListingFailed {
        bucket: String,
        #[source]
        source: StoreError,
    },

    /// A metadata search page failed
    #[error("metadata query on bucket '{bucket}' failed")]
    QueryFailed {
        bucket: String,
        #[source]
        source: StoreError,
    },

    /// The store reported more pages but gave nothing to continue from
    #[error("listing of bucket '{bucket}' is truncated but returned no keys and no marker after '{marker}'")]
    StalledListing { bucket: String, marker: String },
}

impl EngineError {
    /// True for errors raised while paging through the source bucket.
    pub fn is_enumeration_error(&self) -> bool {
        matches!(
            self,
            Self::ListingFailed { .. } | Self::QueryFailed { .. } | Self::StalledListing { .. }
        )
    }
}

/// Render `err` followed by each of its sources, separated by `": "`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
