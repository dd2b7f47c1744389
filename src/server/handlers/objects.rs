// src/server/handlers/objects.rs
//! Signed object reads for the local storage backend
//!
//! `LocalObjectStore::signed_read_url` points here. The URL carries the
//! expiry and an HMAC over key and expiry; anything that fails verification
//! gets a 403 without touching storage.

use super::download::{StreamedObject, stream_response};
use super::ApiResult;
use crate::server::ServerState;
use crate::storage::{ObjectStore, SignedUrlError};
use crate::updates::content_type_for;
use crate::Error;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

fn forbidden(err: SignedUrlError) -> Response {
    (StatusCode::FORBIDDEN, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

/// GET /api/v1/objects/{*key}?expires=..&signature=..
pub async fn get_object(
    State(state): State<Arc<ServerState>>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> ApiResult<Response> {
    let Some(local) = state.local_store.as_ref() else {
        return Err(Error::NotFound("object".to_string()).into());
    };

    let now = chrono::Utc::now().timestamp();
    if let Err(e) = local.verify_signed(&key, query.expires, &query.signature, now) {
        tracing::debug!("Rejected signed URL for {}: {}", key, e);
        return Ok(forbidden(e));
    }

    let size = local.size(&key).await.map_err(Error::from)?;
    let stream = local.get(&key).await.map_err(Error::from)?;
    let filename = key.rsplit('/').next().unwrap_or(key.as_str());
    state.metrics.record_download(size);

    Ok(stream_response(
        StreamedObject {
            filename,
            content_type: content_type_for(filename),
            size,
            sha256: None,
        },
        stream,
    ))
}
