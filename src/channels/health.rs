//! Plain-text liveness listener.
//!
//! Hosting platforms poll `GET /`; every other path is a 404.

use std::net::SocketAddr;

use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::error::ChannelError;

/// Running health listener. Dropping the handle leaves the server running;
/// call [`HealthServer::shutdown`] to stop it.
#[derive(Debug)]
pub struct HealthServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl HealthServer {
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn router() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
}

async fn root_handler() -> &'static str {
    "Telegram Bot is running!"
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

/// Bind and serve the health listener in a background task.
pub async fn start_health_server(addr: SocketAddr) -> Result<HealthServer, ChannelError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: "health".to_string(),
            reason: format!("Failed to bind to {}: {}", addr, e),
        })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ChannelError::StartupFailed {
            name: "health".to_string(),
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Health listener shutting down");
            })
            .await
        {
            tracing::error!("Health listener error: {}", e);
        }
    });

    tracing::info!("Health listener on http://{}", bound_addr);

    Ok(HealthServer {
        addr: bound_addr,
        shutdown_tx: Some(shutdown_tx),
    })
}
