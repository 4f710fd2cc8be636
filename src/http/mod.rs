// src/http/mod.rs

//! Management HTTP API.
//!
//! A thin `axum` layer over [`Supervisor`]: every handler delegates to one
//! supervisor operation and maps its error through [`response::ApiError`].

pub mod handlers;
pub mod response;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::supervisor::Supervisor;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
}

pub fn build_router(supervisor: Supervisor) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::fleet_info))
        .route("/api/info", get(handlers::fleet_info))
        .route(
            "/api/clients",
            get(handlers::list_clients).post(handlers::create_client),
        )
        .route(
            "/api/clients/{id}",
            get(handlers::get_client)
                .put(handlers::update_client)
                .delete(handlers::delete_client),
        )
        .route("/api/clients/{id}/start", post(handlers::start_client))
        .route("/api/clients/{id}/stop", post(handlers::stop_client))
        .route("/api/clients/{id}/restart", post(handlers::restart_client))
        .route(
            "/api/clients/{id}/clear-session",
            post(handlers::clear_session),
        )
        .route("/api/clients/{id}/qr", get(handlers::get_qr))
        .route("/qrs/{id}", get(handlers::get_qr_short))
        .fallback(handlers::not_found)
        .layer(cors)
        .with_state(AppState { supervisor })
}

/// Bind the management API on all interfaces and serve it until `cancel`
/// fires.
pub async fn spawn_http_server(
    port: u16,
    supervisor: Supervisor,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, anyhow::Error> {
    let router = build_router(supervisor);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = port, "management API listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            error!(error = %e, "management API server failed");
        }
    });

    Ok(handle)
}
