//! Telephony-facing web server
//!
//! - `POST /twiml`: answer document that connects the call's media stream
//! - `GET /connection`: media stream WebSocket, one call session per connection
//! - `GET /health`: liveness probe

pub mod call_socket;

use anyhow::{Result, Context};
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::stages::Stages;
use crate::transport::media_stream;

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub stages: Stages,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Build the application router
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/twiml", post(twiml_handler))
        .route("/connection", get(call_socket::ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server with the network-backed stages
pub async fn start(config: Config, host: &str, port: u16) -> Result<()> {
    let stages = Stages::from_config(&config)?;
    let public_host = config.server.public_host.clone();
    let state = ServerState { config: Arc::new(config), stages };

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("     Call Agent Server Starting");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("✓ Server binding to: {}", addr);
    println!("✓ Media streams at: wss://{}/connection", public_host);
    println!();
    println!("🚀 Listening on http://{}", addr);
    println!();

    info!("Listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Answer an incoming or outbound call by connecting its media stream back to us
async fn twiml_handler(State(state): State<ServerState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/xml")],
        media_stream::connect_stream_document(&state.config.server.public_host),
    )
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: crate::VERSION })
}
