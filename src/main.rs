//! Main entry point for the generation orchestrator daemon

use gen_orchestrator::{config::Settings, AppState};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }

    info!(
        provider = %settings.provider.base_url,
        max_concurrent = settings.worker_pool.max_concurrent,
        max_poll_secs = settings.generation.max_poll_secs,
        "Starting generation orchestrator"
    );

    let state = AppState::from_settings(settings)?;

    if state.settings.retention.enabled {
        state
            .sweeper
            .start(Duration::from_secs(state.settings.retention.sweep_interval_secs));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    state.sweeper.stop();
    let grace = Duration::from_secs(state.settings.worker_pool.shutdown_grace_secs);
    let drained = state.pool.shutdown(grace).await;

    info!(drained, pending = state.pool.pending_count(), "Generation orchestrator stopped");
    Ok(())
}
