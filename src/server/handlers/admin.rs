// src/server/handlers/admin.rs
//! Admin endpoints

use crate::server::metrics::MetricsSnapshot;
use crate::server::ServerState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct AdminStats {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub storage_backend: &'static str,
    /// Clients currently tracked by the download rate limiter
    pub rate_limited_clients: usize,
}

/// GET /api/v1/admin/stats
pub async fn stats(State(state): State<Arc<ServerState>>) -> Json<AdminStats> {
    Json(AdminStats {
        metrics: state.metrics.snapshot(),
        storage_backend: state.store.backend_name(),
        rate_limited_clients: state.limiter.as_ref().map_or(0, |l| l.tracked()),
    })
}
