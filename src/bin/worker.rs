use chrono::Utc;
use meal_snap::{
    config::{AppConfig, ImageBackend},
    db,
    pipeline::{
        job::{AnalysisDeps, AnalysisJob},
        notifier::ProgressNotifier,
        runner::JobRunner,
        sweeper::StaleImageSweeper,
    },
    services::{
        encryption::EncryptionService,
        health_store::PgHealthStore,
        image_store::{ImageStore, LocalImageStore, R2ImageStore, StorageError},
        notifications::RedisNotificationSink,
        scheduler::{BackoffPolicy, JobScheduler, RedisJobScheduler},
        vision::WorkersAiClient,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting meal analysis worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    describe_metrics();

    tracing::info!("Connecting to PostgreSQL health data store");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing services");
    let images = build_image_store(&config).expect("Failed to initialize image store");

    let vision = WorkersAiClient::new(
        &config.cf_account_id,
        &config.cf_api_token,
        config.vision_model.as_deref(),
        config.vision_timeout(),
    )
    .expect("Failed to initialize Workers AI client");

    let notifications =
        RedisNotificationSink::new(&config.redis_url).expect("Failed to initialize notifications");

    let scheduler: Arc<dyn JobScheduler> = Arc::new(
        RedisJobScheduler::new(&config.redis_url).expect("Failed to initialize job scheduler"),
    );

    let claim_lease = config.claim_lease();
    if claim_lease <= config.vision_timeout() {
        tracing::warn!(
            claim_lease_secs = claim_lease.as_secs(),
            vision_timeout_secs = config.vision_timeout_secs,
            "Claim lease does not exceed the vision timeout; slow attempts may be dispatched twice"
        );
    }

    let backoff = config.backoff_policy();
    let retention = config.retention_policy();
    if retention.overlaps_retry_window(&backoff) {
        tracing::warn!(
            retention_secs = retention.max_age.as_secs(),
            retry_window_secs = backoff.total_retry_window().as_secs(),
            "Retention window does not exceed the retry window; the sweeper may delete images of jobs still retrying"
        );
    }

    let job = Arc::new(AnalysisJob::new(
        AnalysisDeps {
            vision: Arc::new(vision),
            health_store: Arc::new(PgHealthStore::new(db_pool)),
            images: images.clone(),
            notifications: Arc::new(notifications),
        },
        ProgressNotifier::new(config.notification_channel()),
        backoff.max_attempts,
    ));

    let mut tasks = JoinSet::new();

    let sweeper = StaleImageSweeper::new(images, retention);
    tasks.spawn(sweeper.run_periodic(config.sweep_interval()));
    tasks.spawn(recover_loop(scheduler.clone(), claim_lease));

    let concurrency = config.worker_concurrency.max(1);
    for worker_index in 0..concurrency {
        tasks.spawn(process_loop(
            worker_index,
            scheduler.clone(),
            job.clone(),
            backoff,
            config.poll_interval(),
        ));
    }

    tracing::info!(concurrency, "Worker ready, starting job processing loops");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            // Jobs claimed by this process are recovered once their lease expires.
            tracing::info!("Shutdown requested, stopping worker");
        }
        Some(result) = tasks.join_next() => {
            tracing::error!(?result, "Worker task exited unexpectedly");
        }
    }

    tasks.shutdown().await;
}

/// Poll the scheduler forever, one attempt at a time.
async fn process_loop(
    worker_index: usize,
    scheduler: Arc<dyn JobScheduler>,
    job: Arc<AnalysisJob>,
    backoff: BackoffPolicy,
    poll_interval: Duration,
) {
    let runner = JobRunner::new(scheduler.as_ref(), job.as_ref(), backoff);

    loop {
        match runner.run_once(Utc::now()).await {
            Ok(Some(report)) => {
                tracing::debug!(
                    worker = worker_index,
                    disposition = %report.disposition,
                    "Job processed, checking for next job"
                );
            }
            Ok(None) => {
                tracing::trace!(worker = worker_index, "No jobs due, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(worker = worker_index, error = %e, "Scheduler error, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}

/// Re-schedule jobs whose worker died mid-attempt. Runs once at startup and
/// then every half lease.
async fn recover_loop(scheduler: Arc<dyn JobScheduler>, lease: Duration) {
    let mut ticker = tokio::time::interval(lease / 2);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match scheduler.recover_expired(Utc::now(), lease).await {
            Ok(0) => {}
            Ok(recovered) => tracing::warn!(recovered, "Re-scheduled jobs with expired claims"),
            Err(e) => tracing::error!(error = %e, "Failed to recover expired claims"),
        }
    }
}

fn build_image_store(config: &AppConfig) -> Result<Arc<dyn ImageStore>, StorageError> {
    match config.image_backend {
        ImageBackend::Local => {
            tracing::info!(dir = %config.image_dir, "Using local image store");
            Ok(Arc::new(LocalImageStore::new(&config.image_dir)))
        }
        ImageBackend::R2 => {
            let required = |value: &Option<String>, name: &str| {
                value
                    .clone()
                    .ok_or_else(|| StorageError::Config(format!("{} is required for the r2 backend", name)))
            };
            let encryption = config
                .encryption_key
                .as_deref()
                .map(EncryptionService::from_base64_key)
                .transpose()?;

            tracing::info!(prefix = %config.r2_prefix, encrypted = encryption.is_some(), "Using R2 image store");
            Ok(Arc::new(R2ImageStore::new(
                &required(&config.r2_bucket, "R2_BUCKET")?,
                &required(&config.r2_endpoint, "R2_ENDPOINT")?,
                &required(&config.r2_access_key, "R2_ACCESS_KEY")?,
                &required(&config.r2_secret_key, "R2_SECRET_KEY")?,
                &config.r2_prefix,
                encryption,
            )?))
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "meal_analysis_jobs_total",
        "Analysis attempts by outcome"
    );
    metrics::describe_counter!(
        "meal_analysis_dispositions_total",
        "Analysis attempts by scheduler disposition"
    );
    metrics::describe_histogram!(
        "vision_analysis_seconds",
        "Time spent waiting on the vision service"
    );
    metrics::describe_counter!(
        "image_sweeper_deleted_total",
        "Stale images deleted by the sweeper"
    );
    metrics::describe_counter!(
        "image_sweeper_deleted_bytes_total",
        "Bytes reclaimed by the sweeper"
    );
    metrics::describe_counter!(
        "image_sweeper_errors_total",
        "Sweeper delete or listing failures"
    );
}
