//! Digitizers Diagnostic Server - Axum JSON API
//!
//! Exposes the post-mortem buffer (freeze, drain, metadata) and the pipeline
//! statistics over HTTP so that a fault can be inspected while the stream
//! keeps running.

pub mod api;

use axum::http::{header, HeaderValue};
use axum::Router;
use digitizers_core::config::PipelineConfig;
use digitizers_core::stages::PostMortemSink;
use digitizers_core::stats::StatsStore;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    /// Reader handle to the post-mortem buffer
    pub sink: PostMortemSink,
    /// Pipeline statistics
    pub stats: Arc<Mutex<StatsStore>>,
    /// Pipeline thread liveness, cleared by the thread itself when it exits
    pub running: Arc<AtomicBool>,
    /// Configuration the pipeline was started with
    pub pipeline: PipelineConfig,
    /// Server configuration
    pub config: ServerConfig,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8920,
            bind_addr: "0.0.0.0".to_string(),
        }
    }
}

impl AppState {
    pub fn new(
        sink: PostMortemSink,
        stats: Arc<Mutex<StatsStore>>,
        running: Arc<AtomicBool>,
        pipeline: PipelineConfig,
        config: ServerConfig,
    ) -> Self {
        Self {
            sink,
            stats,
            running,
            pipeline,
            config,
        }
    }
}

/// Build the Axum router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", axum::routing::get(api::get_status))
        .route("/api/v1/stats", axum::routing::get(api::get_stats))
        .route("/api/v1/reset", axum::routing::post(api::reset_stats))
        // Post-mortem read-out
        .route("/api/v1/postmortem", axum::routing::get(api::get_post_mortem))
        .route(
            "/api/v1/postmortem/freeze",
            axum::routing::post(api::freeze_post_mortem),
        )
        .route(
            "/api/v1/postmortem/data",
            axum::routing::get(api::get_post_mortem_data),
        )
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

/// Start the web server, returning once `shutdown` resolves
pub async fn start_server<F>(state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.config.bind_addr, state.config.port);
    let app = build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Digitizers diagnostic server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("Diagnostic server stopped");
    Ok(())
}
