//! HTTP server implementation using Axum.

use crate::handlers::{handle_health, handle_rpc};
use axum::{
    routing::{get, post},
    Router,
};
use labeler_core::{MemoryDocument, SessionHandle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Requests allowed in flight at once. Session messages queue behind each
/// other anyway; this bounds how many callers can wait.
const MAX_IN_FLIGHT_REQUESTS: usize = 32;

/// Application state shared across handlers.
pub struct AppState {
    /// Queue in front of the single labeling session
    pub session: SessionHandle,
    /// Document the session works on
    pub document: Arc<MemoryDocument>,
    /// Where the document is written back on close
    pub document_path: Option<PathBuf>,
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let state = Arc::new(state);

    // Configure CORS for the view
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT_REQUESTS))
                .layer(cors),
        )
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
