pub mod handlers;
pub mod mjpeg;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;
pub use mjpeg::{LiveFeeds, MjpegSink};

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/cameras", get(handlers::handle_cameras))
        .route("/sinks", get(handlers::handle_sinks))
        .route("/shutdown", post(handlers::handle_shutdown));

    Router::new()
        .nest("/api", api_routes)
        .route("/stream/{camera}", get(handlers::handle_stream))
        .route("/snapshot/{camera}", get(handlers::handle_snapshot))
        .with_state(state)
        .layer(cors)
}

pub async fn serve(state: ApiState, addr: &str, shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API to {addr}"))?;
    serve_on(listener, state, shutdown).await
}

/// Serve on an already-bound listener until shutdown.
pub async fn serve_on(
    listener: TcpListener,
    state: ApiState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
