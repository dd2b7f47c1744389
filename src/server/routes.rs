// src/server/routes.rs
//! Axum router configuration for the Depot server
//!
//! - Catalog reads and the update feed are public
//! - Downloads are rate limited per client
//! - Writes and admin endpoints require authorization
//! - Every request gets a trace span, a deadline and a body size cap

use crate::server::handlers::{admin, download, objects, packages, updates};
use crate::server::{ServerState, auth, metrics, security};
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the main application router
pub fn create_router(state: Arc<ServerState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/packages", get(packages::list_packages))
        .route("/packages/:name", get(packages::get_package))
        .route("/packages/:name/versions", get(packages::list_versions))
        .route("/packages/:name/versions/:version", get(packages::get_version))
        .route("/updates", get(updates::list_updates))
        .route("/updates/latest", get(updates::latest))
        .route("/updates/latest/:platform/:arch", get(updates::latest_for_target))
        .route("/objects/*key", get(objects::get_object));

    let download_routes = Router::new()
        .route("/download/:name/:version/:filename", get(download::download_file))
        .route(
            "/updates/download/:version/:platform/:arch/:filename",
            get(updates::download_update),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), security::rate_limit));

    let protected_routes = Router::new()
        .route("/packages", post(packages::create_package))
        .route("/packages/:name", axum::routing::put(packages::replace_package))
        .route("/packages/:name/versions/:version/upload", post(packages::upload_file))
        .route(
            "/packages/:name/versions/:version/:filename",
            delete(packages::delete_file),
        )
        .route(
            "/updates/:version/:platform/:arch",
            post(updates::upload_update).delete(updates::delete_update),
        )
        .route("/admin/stats", get(admin::stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    let api = Router::new()
        .merge(public_routes)
        .merge(download_routes)
        .merge(protected_routes);

    let body_limit = usize::try_from(state.config.max_upload_size).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(state.clone(), metrics::track_requests))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(cors_layer(&state.config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    // Empty list = same-origin only
    if origins.is_empty() {
        return CorsLayer::new();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
