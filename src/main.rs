use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use video_transcoder::config::settings::WorkerConfig;
use video_transcoder::infrastructure::db::pool::connect_to_db;
use video_transcoder::infrastructure::storage::s3::StorageService;
use video_transcoder::modules::video::repository::PgJobStore;
use video_transcoder::workers::encoder::FfmpegEncoder;
use video_transcoder::workers::transcoder::TranscodePipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;

    info!("🎥 Starting transcoder for {}/{}", config.source_bucket, config.object_key);

    let pool = connect_to_db(&config.database_url, 2)
        .await
        .context("failed to connect to the job record store")?;
    let storage = StorageService::new(&config.storage).await;
    let encoder = FfmpegEncoder::new(config.ffmpeg_command.clone()).with_timeout(config.encode_timeout);

    let pipeline = TranscodePipeline::new(
        Arc::new(storage),
        Arc::new(PgJobStore::new(pool)),
        Arc::new(encoder),
        config.pipeline_settings(),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let outcome = pipeline
        .run(&config.object_key, cancel)
        .await
        .with_context(|| format!("transcoding {} failed", config.object_key))?;

    for (label, name) in &outcome.variant_outputs {
        info!(variant = %label, "{}/{}", config.output_bucket, name);
    }

    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("🛑 Shutdown requested, cancelling job");
    cancel.cancel();
}
