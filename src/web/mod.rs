//! The web module: HTTP status/command endpoints and the WebSocket telemetry feed.

pub mod api;
pub mod models;
pub mod socket;

pub use api::{create_router, AppState, AppStateInner};

use std::future::Future;
use tokio::net::TcpListener;

/// Serve the API until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
