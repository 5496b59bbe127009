//! Core data model for copy jobs.
//!
//! This module defines the main data structures for a bucket-to-bucket copy:
//! - CopyJob: one run of the tool
//! - CopyJobConfig: the immutable settings of a run
//! - ObjectKey, Batch, PageCursor: what flows from enumeration to the copy tasks
//! - Operation, Acl, MetadataDirective, RetryPolicy: how each object is handled

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::summary::{RunCounters, RunSummary};

/// Number of copy attempts per object unless configured otherwise.
pub const DEFAULT_COPY_ATTEMPTS: u32 = 3;

/// Page size used when none is given.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Name of an object within a bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Self {
        ObjectKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the copy in the target bucket: `prefix` followed by this key.
    ///
    /// Plain concatenation, no separator is inserted and nothing is normalized.
    pub fn with_prefix(&self, prefix: &str) -> String {
        let mut target = String::with_capacity(prefix.len() + self.0.len());
        target.push_str(prefix);
        target.push_str(&self.0);
        target
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectKey {
    fn from(key: &str) -> Self {
        ObjectKey::new(key)
    }
}

impl From<String> for ObjectKey {
    fn from(key: String) -> Self {
        ObjectKey(key)
    }
}

/// Canned ACL applied to every copied object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acl {
    Private,
    #[default]
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl Acl {
    /// Value of the `x-amz-acl` header.
    pub fn as_header(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
            Acl::PublicReadWrite => "public-read-write",
            Acl::AuthenticatedRead => "authenticated-read",
            Acl::BucketOwnerRead => "bucket-owner-read",
            Acl::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header())
    }
}

impl FromStr for Acl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private" => Ok(Acl::Private),
            "public-read" => Ok(Acl::PublicRead),
            "public-read-write" => Ok(Acl::PublicReadWrite),
            "authenticated-read" => Ok(Acl::AuthenticatedRead),
            "bucket-owner-read" => Ok(Acl::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(Acl::BucketOwnerFullControl),
            other => Err(format!(
                "unknown ACL '{}'; expected one of private, public-read, public-read-write, \
                 authenticated-read, bucket-owner-read, bucket-owner-full-control",
                other
            )),
        }
    }
}

/// What happens to the metadata of the target object during a server-side copy.
///
/// Only replacement is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataDirective {
    #[default]
    Replace,
}

impl MetadataDirective {
    /// Value of the `x-amz-metadata-directive` header.
    pub fn as_header(&self) -> &'static str {
        match self {
            MetadataDirective::Replace => "REPLACE",
        }
    }
}

/// The operation applied to every object of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Server-side copy into the target bucket
    Copy {
        acl: Acl,
        directive: MetadataDirective,
    },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Copy { .. } => write!(f, "CopyObject"),
        }
    }
}

/// How often a single object copy is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Pause between two attempts; zero retries immediately
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_COPY_ATTEMPTS,
            backoff: Duration::ZERO,
        }
    }
}

/// Settings of one copy run. Built once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJobConfig {
    pub source_bucket: String,
    pub target_bucket: String,

    /// Only objects whose key starts with this are listed (listing mode)
    pub source_prefix: String,

    /// Prepended to every source key to build the target key
    pub target_prefix: String,

    /// Metadata search expression; selects query mode when set
    pub query: Option<String>,

    /// Keys requested per listing/query call, and thus objects in flight at once
    pub page_size: u32,

    /// Log every successfully copied object
    pub verbose: bool,

    /// ACL of the copied objects
    pub acl: Acl,

    pub retry: RetryPolicy,

    /// Upper bound on concurrent copies; `None` lets a whole page run at once
    pub max_concurrency: Option<usize>,
}

impl CopyJobConfig {
    pub fn new(source_bucket: impl Into<String>, target_bucket: impl Into<String>) -> Self {
        CopyJobConfig {
            source_bucket: source_bucket.into(),
            target_bucket: target_bucket.into(),
            source_prefix: String::new(),
            target_prefix: String::new(),
            query: None,
            page_size: DEFAULT_PAGE_SIZE,
            verbose: false,
            acl: Acl::default(),
            retry: RetryPolicy::default(),
            max_concurrency: None,
        }
    }

    /// The metadata search expression, if one was given and is not blank.
    pub fn search_query(&self) -> Option<&str> {
        self.query.as_deref().filter(|q| !q.trim().is_empty())
    }

    /// The operation dispatched for every enumerated key.
    pub fn operation(&self) -> Operation {
        Operation::Copy {
            acl: self.acl,
            directive: MetadataDirective::Replace,
        }
    }
}

/// Keys found by one enumeration call, ready to be dispatched.
#[derive(Debug, Clone)]
pub struct Batch {
    pub keys: Vec<ObjectKey>,
    pub operation: Operation,
    pub config: Arc<CopyJobConfig>,
}

impl Batch {
    pub fn new(keys: Vec<ObjectKey>, config: Arc<CopyJobConfig>) -> Self {
        let operation = config.operation();
        Batch {
            keys,
            operation,
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Position of the enumeration within the source bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Nothing requested yet
    Start,
    /// Continue from this marker
    After(String),
    /// The store reported the last page
    Exhausted,
}

impl PageCursor {
    /// Marker to send with the next request; empty for the first page.
    pub fn marker(&self) -> &str {
        match self {
            PageCursor::After(marker) => marker,
            PageCursor::Start | PageCursor::Exhausted => "",
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, PageCursor::Exhausted)
    }
}

/// The state of a copy job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, not yet started
    Pending,
    /// Enumerating and copying
    Running,
    /// Every page was enumerated and every dispatched copy finished
    Completed,
    /// Enumeration failed; the run stopped early
    Aborted,
}

/// One bucket-to-bucket copy run.
#[derive(Debug)]
pub struct CopyJob {
    /// Unique identifier for this run, attached to its log lines
    pub id: Uuid,

    pub config: Arc<CopyJobConfig>,

    pub state: JobState,

    /// Outcome tallies shared with every copy task
    pub counters: RunCounters,

    /// Enumeration calls that returned successfully
    pub pages_fetched: u64,

    /// Non-empty pages handed to the dispatcher
    pub batches_dispatched: u64,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When enumeration started
    pub start_time: Option<Instant>,

    /// When the run completed or aborted
    pub end_time: Option<Instant>,
}

impl CopyJob {
    /// Time spent running so far, or in total once the job has ended.
    pub fn elapsed(&self) -> Duration {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Snapshot of the counters and elapsed time.
    pub fn summary(&self) -> RunSummary {
        self.counters.snapshot(self.elapsed())
    }
}
