mod config;
mod routes;
mod ws;

use crate::config::Config;
use crate::routes::AppState;
use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use eikaiwa_core::feedback::AnthropicSynthesizer;
use eikaiwa_core::instructors::InstructorCatalog;
use eikaiwa_core::storage::MemoryHandoffSlot;
use eikaiwa_core::token::TokenIssuer;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    if config.avatar_api_key.is_none() {
        warn!("ANAM_API_KEY is not set; session token requests will fail");
    }
    if config.anthropic_api_key.is_none() {
        warn!("ANTHROPIC_API_KEY is not set; feedback requests will fail");
    }

    let state = AppState {
        catalog: Arc::new(InstructorCatalog::new()),
        issuer: Arc::new(TokenIssuer::new(config.avatar_api_key.clone())?),
        synthesizer: Arc::new(AnthropicSynthesizer::new(
            config.anthropic_api_key.clone(),
            config.feedback_model.clone(),
        )?),
        store: Arc::new(MemoryHandoffSlot::new()),
    };

    // Permissive CORS so a separately served frontend can reach the API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/instructors", get(routes::list_instructors))
        .route("/api/session", post(routes::create_session))
        .route("/api/feedback", post(routes::generate_feedback))
        .route("/api/lesson-data", get(routes::take_lesson_data))
        .route("/ws/lesson", get(ws::lesson_ws))
        .layer(cors)
        .with_state(state);

    info!("Starting eikaiwa API server, listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
