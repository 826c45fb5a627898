use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::cluster::ClusterAggregator;
use crate::config::Settings;
use crate::logs::DirectoryCollector;

/// State shared across all web request handlers
pub struct WebState {
    pub collector: DirectoryCollector,
    pub aggregator: ClusterAggregator,
    pub default_lines: usize,
}

impl WebState {
    /// Build the collector and aggregator from resolved settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let collector = DirectoryCollector::new(
            settings.log_dir(),
            settings.line_reader(),
            settings.limits.max_concurrency,
        )
        .with_timeout(settings.request_timeout());

        let aggregator = ClusterAggregator::new(
            &settings.cluster.peers,
            settings.peer_timeout(),
            settings.limits.max_concurrency,
        )
        .context("Failed to build peer HTTP client")?
        .with_deadline(settings.request_timeout());

        Ok(Self {
            collector,
            aggregator,
            default_lines: settings.logs.default_lines,
        })
    }
}

/// Create the axum router
pub fn create_router(state: Arc<WebState>) -> Router {
    Router::new()
        .merge(super::api::api_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Start the web server and run until Ctrl-C / SIGTERM
pub async fn start_web_server(settings: &Settings) -> Result<()> {
    let state = Arc::new(WebState::from_settings(settings)?);
    let log_dir = state.collector.dir().display().to_string();
    let peers = state.aggregator.peers().len();
    let app = create_router(state);

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        addr = %addr,
        log_dir = %log_dir,
        peers,
        "Web server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Received shutdown signal");
}
