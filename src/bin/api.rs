use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use video_transcoder::app::create_app;
use video_transcoder::config::settings::ApiConfig;
use video_transcoder::infrastructure::db::pool::connect_to_db;
use video_transcoder::modules::video::repository::{JobStore, PgJobStore};
use video_transcoder::state::AppState;
use video_transcoder::workers::heartbeat::StaleJobSweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting status API...");

    let config = ApiConfig::from_env().context("invalid API configuration")?;
    let pool = connect_to_db(&config.database_url, 10)
        .await
        .context("failed to connect to the job record store")?;
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));

    let shutdown = CancellationToken::new();
    let sweeper = StaleJobSweeper::new(jobs.clone(), config.stale_job_threshold, config.stale_sweep_interval);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    let app = create_app(AppState::new(jobs, config.formats.clone()));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server running on http://{}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
            server_shutdown.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    let _ = sweeper_handle.await;

    Ok(())
}
