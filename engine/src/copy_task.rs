//! Copy of a single object, with a bounded number of attempts.

use tracing::{error, info, warn};

use crate::error::{error_chain, StoreError};
use crate::model::{Acl, CopyJobConfig, MetadataDirective, ObjectKey};
use crate::store::{CopyRequest, RemoteStore};
use crate::summary::RunCounters;

/// Terminal outcome of one copy task.
#[derive(Debug)]
pub enum CopyOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: StoreError },
}

impl CopyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CopyOutcome::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            CopyOutcome::Succeeded { attempts } | CopyOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Build the server-side copy request for `key`.
pub fn copy_request(
    config: &CopyJobConfig,
    key: &ObjectKey,
    acl: Acl,
    directive: MetadataDirective,
) -> CopyRequest {
    CopyRequest {
        source_bucket: config.source_bucket.clone(),
        source_key: key.as_str().to_string(),
        target_bucket: config.target_bucket.clone(),
        target_key: key.with_prefix(&config.target_prefix),
        acl,
        directive,
    }
}

/// Copy `key` from the source to the target bucket.
///
/// The object counts as attempted once, however many calls it takes. Each
/// failed call is logged and retried until `config.retry.max_attempts` calls
/// have been made; the object is then counted as failed. Store errors never
/// escape this function.
pub async fn run_copy_task(
    store: &dyn RemoteStore,
    config: &CopyJobConfig,
    key: &ObjectKey,
    acl: Acl,
    directive: MetadataDirective,
    counters: &RunCounters,
) -> CopyOutcome {
    counters.record_attempted();

    let request = copy_request(config, key, acl, directive);
    let max_attempts = config.retry.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match store.copy_object(&request).await {
            Ok(()) => {
                counters.record_succeeded();
                if config.verbose {
                    info!(
                        "Object {} has been copied from {} to {}",
                        key, config.source_bucket, config.target_bucket
                    );
                }
                return CopyOutcome::Succeeded { attempts };
            }
            Err(err) => {
                warn!(key = %key, attempt = attempts, "{}", error_chain(&err));
                if attempts >= max_attempts {
                    counters.record_failed();
                    error!(
                        "Object {} hasn't been copied from {} to {}",
                        key, config.source_bucket, config.target_bucket
                    );
                    return CopyOutcome::Failed {
                        attempts,
                        error: err,
                    };
                }
            }
        }

        if !config.retry.backoff.is_zero() {
            tokio::time::sleep(config.retry.backoff).await;
        }
    }
}
