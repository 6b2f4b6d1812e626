//! TokenWatch proxy server
//!
//! Relays LLM API traffic to the configured upstreams and records token usage

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokenwatch::config::{PricingFile, Settings};
use tokenwatch::handlers::{create_router, AppState};
use tokenwatch::services::{JsonlStore, PricingTable, RecordSink};
use tokenwatch::utils::logging::init_logging;
use tracing::{error, info, warn};

/// Bounded wait for queued records at shutdown
const SINK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("Failed to load server settings")?;

    init_logging(&settings.logging)?;
    info!("{}", tokenwatch::version_info());

    let mut pricing = PricingTable::builtin();
    if let Some(overrides) = PricingFile::load_optional(settings.sink.pricing_path.as_deref())
        .context("Failed to load pricing overrides")?
    {
        pricing = pricing.with_overrides(&overrides);
    }
    info!("Pricing table loaded with {} entries", pricing.len());

    let store = JsonlStore::open(&settings.sink.store_path)
        .await
        .context("Failed to open record store")?;
    info!("Recording usage to {}", store.path().display());
    let (sink, worker) = RecordSink::spawn(
        Arc::new(store),
        settings.sink.queue_capacity,
        settings.enqueue_timeout(),
    );

    let addr = settings.listen_addr();
    let state = Arc::new(AppState::new(settings, pricing, sink)?);
    info!("Anthropic upstream: {}", state.settings.upstream.anthropic_url);
    info!("OpenAI-compatible upstream: {}", state.settings.upstream.openai_url);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("TokenWatch proxy listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped, draining record queue");
    match worker.drain(SINK_DRAIN_TIMEOUT).await {
        Ok(_) => {}
        Err(e) => warn!("Records may have been lost: {:#}", e),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Signal received, starting graceful shutdown");
}
