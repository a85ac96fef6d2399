use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::AppState;
use api_shared::ApiTokens;
use journal_core::CoreConfig;
use journal_messaging::{MessagingConfig, Pipeline};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Main entry point for the patient journal service
///
/// Opens the record store, starts the command pipeline (embedded broker, mutation engines and
/// outbox relay) and serves the REST API until SIGINT/SIGTERM. On shutdown the command topics
/// are drained and pending events published before the pipeline stops.
///
/// # Environment Variables
/// - `JOURNAL_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `JOURNAL_DATA_DIR`: Directory for the record store (in-memory when unset)
/// - `JOURNAL_API_TOKENS`: `token:ROLE` pairs; authorisation is disabled when unset
/// - `JOURNAL_PARTITIONS`, `JOURNAL_PUBLISH_TIMEOUT_MS`, `JOURNAL_MAX_DELIVERY_ATTEMPTS`,
///   `JOURNAL_REDELIVERY_BACKOFF_MS`: channel tuning
///
/// # Returns
/// * `Ok(())` - If the server runs and shuts down cleanly
/// * `Err(anyhow::Error)` - If configuration, startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("journal_run=info".parse()?)
                .add_directive("journal_core=info".parse()?)
                .add_directive("journal_messaging=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("JOURNAL_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let core = CoreConfig::from_data_dir_value(std::env::var("JOURNAL_DATA_DIR").ok())?;
    match core.data_dir() {
        Some(dir) => tracing::info!("++ Record store at {}", dir.display()),
        None => tracing::warn!("JOURNAL_DATA_DIR not set, records are kept in memory only"),
    }
    let store = Arc::new(core.open_store()?);

    let messaging = MessagingConfig::from_lookup(|name| std::env::var(name).ok())?;
    let tokens = ApiTokens::parse(std::env::var("JOURNAL_API_TOKENS").ok().as_deref())?;
    if !tokens.is_enabled() {
        tracing::warn!("JOURNAL_API_TOKENS not set, authorisation is disabled");
    }

    let pipeline = Pipeline::start(store, messaging)?;
    let app = api_rest::router(AppState::new(&pipeline, tokens));

    tracing::info!("++ Starting journal REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("-- Draining command pipeline");
    if let Err(e) = pipeline.settle(DRAIN_TIMEOUT).await {
        tracing::warn!("pipeline not fully drained before shutdown: {}", e);
    }
    pipeline.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
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
                tracing::error!("failed to listen for SIGTERM: {}", e);
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
    tracing::info!("-- Shutdown signal received");
}
