// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::clock::SystemClock;
use crate::application::stats_engine::StatsEngine;
use crate::infrastructure::config::load_config;
use crate::infrastructure::moloch_api::MolochApi;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    get_frame, get_frame_svg, get_stats, health_check, stream_frames, update_selection,
    update_visibility,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stats_horizon=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let config = load_config()?;
    let engine_settings = config
        .graph
        .engine_settings()
        .context("Invalid graph settings")?;

    // Stats API client (infrastructure layer)
    let api = Arc::new(MolochApi::new(
        config.viewer.base_url.clone(),
        config.viewer.cookie.clone(),
    ));

    // Engine (application layer). A failed listing leaves it in an error state
    // that the handlers report; the server still comes up.
    let mut engine = StatsEngine::new(api, Arc::new(SystemClock), engine_settings);
    if let Err(e) = engine.init().await {
        tracing::error!("Stats engine failed to initialize: {}", e);
    }
    let state = AppState::new(engine);

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/stats", get(get_stats))
        .route("/horizon", get(get_frame))
        .route("/horizon.svg", get(get_frame_svg))
        .route("/horizon/stream", get(stream_frames))
        .route("/selection", post(update_selection))
        .route("/visibility", post(update_visibility))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Start server
    let addr: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.server.listen))?;
    tracing::info!("Starting stats-horizon service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    state.engine.lock().await.shutdown();
    Ok(())
}
