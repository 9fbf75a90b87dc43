//! HTTP server initialization and routing

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;

use super::health_check;

/// Room for the multipart envelope around the largest accepted upload.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

pub fn build_router(app_state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(
        app_state
            .config
            .email
            .max_attachment_bytes
            .saturating_add(MULTIPART_OVERHEAD_BYTES),
    )
    .unwrap_or(usize::MAX);

    Router::new()
        .route(ApiUrls::HEALTH, get(health_check))
        .merge(crate::auth::configure())
        .merge(crate::tickets::intake::configure())
        .merge(crate::tickets::configure())
        .merge(crate::email::configure())
        .merge(crate::insurers::configure())
        .layer(DefaultBodyLimit::disable())
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                        .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
                )
                .layer(RequestBodyLimitLayer::new(body_limit))
                .layer(CookieManagerLayer::new()),
        )
        .with_state(app_state)
}

pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub async fn run_axum_server(app_state: Arc<AppState>) -> std::io::Result<()> {
    let host: std::net::IpAddr = app_state
        .config
        .server
        .host
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let addr = SocketAddr::new(host, app_state.config.server.port);

    let app = build_router(app_state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(
                "Failed to bind to {}: {} - is another instance running?",
                addr, e
            );
            return Err(e);
        }
    };
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)
}
