//! bucketcopy - command-line interface for the bucket copy engine.
//!
//! Parses arguments, sets up logging and the store client, runs one copy job
//! and reports the summary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use engine::{
    create_job, run_job, Acl, CopyJob, CopyJobConfig, CopyOutcome, ObjectKey, ProgressCallback,
    RetryPolicy, RunSummary, S3Client, S3Config, DEFAULT_COPY_ATTEMPTS, DEFAULT_PAGE_SIZE,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// bucketcopy - copy the objects of one bucket into another
#[derive(Parser, Debug)]
#[command(name = "bucketcopy")]
#[command(version)]
#[command(about = "Copy objects between buckets of an S3-compatible store with server-side copies")]
struct Args {
    /// The object store endpoint, e.g. https://ecs.example.com:9021
    #[arg(short = 'e', long, value_name = "URL")]
    endpoint: String,

    /// The object user (access key)
    #[arg(short = 'u', long, value_name = "USER")]
    user: String,

    /// The object user password (secret key)
    #[arg(
        short = 'p',
        long,
        value_name = "SECRET",
        env = "BUCKETCOPY_PASSWORD",
        hide_env_values = true
    )]
    password: String,

    /// The source bucket
    #[arg(short = 's', long = "source", value_name = "BUCKET")]
    source: String,

    /// The target bucket
    #[arg(short = 't', long = "target", value_name = "BUCKET")]
    target: String,

    /// Only copy objects whose key starts with this prefix
    #[arg(short = 'x', long = "sourceprefix", value_name = "PREFIX", default_value = "")]
    source_prefix: String,

    /// Prepended to every key in the target bucket
    #[arg(short = 'y', long = "targetprefix", value_name = "PREFIX", default_value = "")]
    target_prefix: String,

    /// The number of keys to retrieve per page, and thus copied simultaneously
    #[arg(short = 'm', long = "maxkeys", value_name = "N", default_value_t = DEFAULT_PAGE_SIZE)]
    max_keys: u32,

    /// The metadata search query selecting the objects of the source bucket
    #[arg(short = 'q', long = "query", value_name = "QUERY")]
    query: Option<String>,

    /// Also log every object copied successfully
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Region used to sign requests
    #[arg(long, value_name = "REGION", default_value = "us-east-1")]
    region: String,

    /// Canned ACL of the copied objects
    #[arg(long, value_name = "ACL", default_value = "public-read")]
    acl: String,

    /// Copy attempts per object before it is counted as failed
    #[arg(long, value_name = "N", default_value_t = DEFAULT_COPY_ATTEMPTS)]
    retries: u32,

    /// Pause between two attempts of the same object
    #[arg(long, value_name = "MS", default_value_t = 0)]
    retry_backoff_ms: u64,

    /// Upper bound on concurrent copies (defaults to the page size)
    #[arg(long, value_name = "N")]
    max_concurrency: Option<usize>,

    /// Timeout of a single request to the store
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    timeout: u64,
}

/// CLI implementation of ProgressCallback, reporting page progress in the log
struct CliProgress;

impl ProgressCallback for CliProgress {
    fn on_job_started(&self, job: &CopyJob) {
        let config = &job.config;
        info!(
            "Copying {}/{}* to {}/{}",
            config.source_bucket, config.source_prefix, config.target_bucket, config.target_prefix
        );
        if let Some(query) = config.search_query() {
            info!("Selecting objects matching '{}'", query);
        }
    }

    fn on_page_fetched(&self, job: &CopyJob, keys: usize) {
        debug!("Page {}: {} objects", job.pages_fetched, keys);
    }

    fn on_object_completed(&self, _key: &ObjectKey, _outcome: &CopyOutcome) {
        // The copy task logs its own outcome.
    }

    fn on_batch_completed(&self, job: &CopyJob, batch_size: usize) {
        info!(
            "Page {} done ({} objects): {} succeeded, {} failed so far",
            job.pages_fetched,
            batch_size,
            job.counters.succeeded(),
            job.counters.failed()
        );
    }

    fn on_job_completed(&self, _job: &CopyJob) {}
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Parse arguments, run the copy, and exit with 0 (all copied), 1 (aborted
/// or not started) or 2 (completed with failed objects).
#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging();

    let result = run_cli(&args).await;
    if let Err(err) = &result {
        error!("{:#}", err);
    }

    std::process::exit(exit_code(&result));
}

/// 0 when every object was copied, 2 when some copies failed, 1 when the run
/// did not start or was aborted.
fn exit_code(result: &anyhow::Result<RunSummary>) -> i32 {
    match result {
        Ok(summary) if summary.has_failures() => 2,
        Ok(_) => 0,
        Err(_) => 1,
    }
}

/// Main CLI logic - separated for testability
async fn run_cli(args: &Args) -> anyhow::Result<RunSummary> {
    let config = build_config(args)?;
    let mut job = create_job(config).context("job creation failed")?;
    let store = S3Client::new(build_store_config(args)).context("store client setup failed")?;

    let progress: Arc<dyn ProgressCallback> = Arc::new(CliProgress);
    let result = run_job(&mut job, Arc::new(store), Some(progress)).await;

    // Reported whether the run completed or aborted.
    job.summary().log();

    result.context("copy aborted")
}

fn build_config(args: &Args) -> anyhow::Result<CopyJobConfig> {
    let acl: Acl = args.acl.parse().map_err(|e: String| anyhow!(e))?;

    let mut config = CopyJobConfig::new(args.source.clone(), args.target.clone());
    config.source_prefix = args.source_prefix.clone();
    config.target_prefix = args.target_prefix.clone();
    config.query = args.query.clone().filter(|q| !q.trim().is_empty());
    config.page_size = args.max_keys;
    config.verbose = args.verbose;
    config.acl = acl;
    config.retry = RetryPolicy {
        max_attempts: args.retries,
        backoff: Duration::from_millis(args.retry_backoff_ms),
    };
    config.max_concurrency = args.max_concurrency;
    Ok(config)
}

fn build_store_config(args: &Args) -> S3Config {
    S3Config {
        endpoint: args.endpoint.clone(),
        access_key: args.user.clone(),
        secret_key: args.password.clone(),
        region: args.region.clone(),
        request_timeout: Duration::from_secs(args.timeout),
    }
}
