//! HTTP server implementation using Axum.

use crate::handlers::{handle_health, handle_rpc};
use crate::progress::ProgressBoard;
use alchemist_core::AlchemistApi;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Core API (platform access, resolver, download manager)
    pub api: AlchemistApi,
    /// Latest progress per download task, fed by the download manager
    pub progress: ProgressBoard,
}

/// Build the router without binding a socket.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the JSON-RPC HTTP server.
///
/// `board` must be the sink the API's download manager reports to, otherwise
/// `get_download_status` never sees progress. Returns the bound address
/// (useful when port=0).
pub async fn start_server(
    api: AlchemistApi,
    board: ProgressBoard,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let state = Arc::new(AppState {
        api,
        progress: board,
    });
    let app = router(state);

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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_server_starts() {
        let temp_dir = TempDir::new().unwrap();
        let api = AlchemistApi::builder()
            .models_dir(temp_dir.path())
            .output_dir(None)
            .build()
            .unwrap();

        let addr = start_server(api, ProgressBoard::new(), "127.0.0.1", 0)
            .await
            .unwrap();
        assert!(addr.port() > 0);
    }
}
