//! # bucketcopy engine - bucket-to-bucket copy library
//!
//! Copies every object of a source bucket (optionally restricted to a key
//! prefix or to the results of a metadata search) into a target bucket of an
//! S3-compatible object store, using server-side copies.
//!
//! ## Overview
//!
//! - Paginated enumeration, either by prefix listing or by metadata query
//! - One concurrent copy task per object of a page
//! - Strict page sequencing: page N+1 is requested only once every copy of
//!   page N has finished
//! - Per-object retries; failures are counted, never fatal
//! - Progress reporting via callbacks (decoupled from the CLI)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use engine::{create_job, run_job, CopyJobConfig, S3Client, S3Config};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = S3Client::new(S3Config {
//!     endpoint: "https://ecs.example.com:9021".to_string(),
//!     access_key: "user".to_string(),
//!     secret_key: "secret".to_string(),
//!     region: "us-east-1".to_string(),
//!     request_timeout: Duration::from_secs(60),
//! })?;
//!
//! let mut config = CopyJobConfig::new("photos", "photos-archive");
//! config.target_prefix = "2024/".to_string();
//!
//! let mut job = create_job(config)?;
//! let summary = run_job(&mut job, Arc::new(store), None).await?;
//! summary.log();
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (CopyJob, CopyJobConfig, ObjectKey, Batch)
//! - **error**: Error types and handling
//! - **store**: Remote store contract
//! - **s3**: HTTP client for S3-compatible stores
//! - **enumerator**: Listing and query pagination
//! - **dispatcher**: Batch fan-out and completion barrier
//! - **copy_task**: Single-object copy with retries
//! - **summary**: Run counters and final report
//! - **job**: Job orchestration (create, run)
//! - **progress**: Progress callback trait

pub mod copy_task;
pub mod dispatcher;
pub mod enumerator;
pub mod error;
pub mod job;
pub mod model;
pub mod progress;
pub mod s3;
pub mod store;
pub mod summary;

// Re-export main types and functions
pub use copy_task::CopyOutcome;
pub use error::{EngineError, StoreError};
pub use job::{create_job, run_job};
pub use model::{
    Acl, Batch, CopyJob, CopyJobConfig, JobState, MetadataDirective, ObjectKey, Operation,
    PageCursor, RetryPolicy, DEFAULT_COPY_ATTEMPTS, DEFAULT_PAGE_SIZE,
};
pub use progress::ProgressCallback;
pub use s3::{S3Client, S3Config};
pub use store::{CopyRequest, ListPage, QueryPage, RemoteStore, NO_MORE_PAGES};
pub use summary::{RunCounters, RunSummary};
