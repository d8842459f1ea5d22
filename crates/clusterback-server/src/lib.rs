//! HTTP API for clusterback.
//!
//! Exposes on-demand capture, version listing, diff and rollback over the
//! same [`Engine`](clusterback_core::Engine) the CLI and watch tasks use.

pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;

use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bind `address` and serve until `shutdown` is cancelled.
pub async fn serve(
    address: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "Server listening");

    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
