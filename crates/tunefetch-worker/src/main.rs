//! Download worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tunefetch_queue::{JobQueue, ProgressPublisher, QueueConfig, RedisProgressBus};
use tunefetch_worker::{
    metrics, JobProcessor, RecoverySweep, RetentionSweep, Scheduler, SpotifyMetadataProvider,
    Worker, WorkerConfig, YtDlpFetcher,
};

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("tunefetch=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting tunefetch-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", WorkerConfig {
        spotify_client_secret: "[REDACTED]".to_string(),
        ..config.clone()
    });

    if config.metrics_enabled {
        metrics::init_metrics(config.metrics_port)?;
        info!("Metrics exposed on port {}", config.metrics_port);
    }

    let queue_config = QueueConfig::from_env();
    let queue = JobQueue::connect(queue_config.clone()).context("Failed to create job queue")?;
    let bus = RedisProgressBus::new(&queue_config.redis_url, queue_config.key_prefix.clone())
        .context("Failed to create progress bus")?;

    let metadata =
        SpotifyMetadataProvider::new(&config.spotify_client_id, &config.spotify_client_secret)
            .context("Failed to create Spotify client")?;
    let fetcher = YtDlpFetcher::new(config.ytdlp_path.clone());

    let processor = JobProcessor::new(
        Arc::new(metadata),
        Arc::new(fetcher),
        ProgressPublisher::new(Arc::new(bus)),
        config.output_root.clone(),
    );
    processor
        .prepare_output()
        .await
        .context("Failed to create output folders")?;

    let stale_threshold = config.stale_threshold_chrono();
    let worker = Worker::new(
        queue.clone(),
        Scheduler::new(queue.clone(), processor, stale_threshold, config.tick_interval),
        RecoverySweep::new(queue.clone(), stale_threshold, config.recovery_interval),
        RetentionSweep::new(queue, config.retention_ttl_chrono(), config.retention_interval),
    );

    let reason = worker.run().await?;
    if reason.is_fault() {
        anyhow::bail!("Worker stopped after fault: {:?}", reason);
    }

    Ok(())
}
