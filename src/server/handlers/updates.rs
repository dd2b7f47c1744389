// src/server/handlers/updates.rs
//! Self-update endpoints
//!
//! Clients poll `/updates/latest` (or the per-platform variant) and fetch
//! binaries through `/updates/download/...`. Publishing and deleting are
//! protected by the router.

use super::download::{StreamedObject, stream_response};
use super::{ApiResult, multipart_error, read_file_field, read_text_field};
use crate::db::models::{LatestVersionAggregate, UpdateBinary};
use crate::hash::DigestedContent;
use crate::server::ServerState;
use crate::updates::{Arch, Platform, UpdateUpload, content_type_for};
use crate::Error;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Parse path segments into a target, applying arch aliases first
fn parse_target(platform: &str, arch: &str) -> crate::Result<(Platform, Arch)> {
    let platform = platform.parse::<Platform>().map_err(Error::Validation)?;
    let arch = Arch::normalize(arch).parse::<Arch>().map_err(Error::Validation)?;
    Ok((platform, arch))
}

fn absolute(public_url: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{}{}", public_url.trim_end_matches('/'), path)
    } else {
        path.to_string()
    }
}

/// Response for a successful update upload
#[derive(Debug, Serialize)]
pub struct PublishedUpdate {
    pub update: UpdateBinary,
    /// Headline version of the feed after the merge
    pub latest_version: String,
}

/// GET /api/v1/updates
pub async fn list_updates(State(state): State<Arc<ServerState>>) -> ApiResult<Json<Vec<UpdateBinary>>> {
    Ok(Json(state.updates.list().await?))
}

/// GET /api/v1/updates/latest
pub async fn latest(State(state): State<Arc<ServerState>>) -> ApiResult<Json<LatestVersionAggregate>> {
    let doc = state.updates.latest_document(&state.config.public_url).await?;
    Ok(Json(doc))
}

/// GET /api/v1/updates/latest/{platform}/{arch}
pub async fn latest_for_target(
    State(state): State<Arc<ServerState>>,
    Path((platform, arch)): Path<(String, String)>,
) -> ApiResult<Json<UpdateBinary>> {
    let (platform, arch) = parse_target(&platform, &arch)?;
    let mut update = state.updates.latest_for(platform, arch).await?;
    update.download_url = absolute(&state.config.public_url, &update.download_url);
    Ok(Json(update))
}

/// POST /api/v1/updates/{version}/{platform}/{arch}
///
/// Multipart fields: `file` and `signature` (both required), `notes`.
pub async fn upload_update(
    State(state): State<Arc<ServerState>>,
    Path((version, platform, arch)): Path<(String, String, String)>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let (platform, arch) = parse_target(&platform, &arch)?;
    let limit = state.config.max_upload_size;

    let mut binary: Option<(String, DigestedContent)> = None;
    let mut signature: Option<String> = None;
    let mut notes = String::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(e, limit))? {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                binary = Some((filename, read_file_field(field, limit).await?));
            }
            Some("signature") => {
                let content = read_file_field(field, limit).await?;
                let text = String::from_utf8(content.bytes.to_vec())
                    .map_err(|_| Error::Validation("signature must be UTF-8 text".to_string()))?;
                signature = Some(text);
            }
            Some("notes") => {
                notes = read_text_field(field, limit).await?;
            }
            _ => {}
        }
    }

    let (filename, binary) =
        binary.ok_or_else(|| Error::Validation("multipart field 'file' is required".to_string()))?;
    let signature = signature
        .ok_or_else(|| Error::Validation("multipart field 'signature' is required".to_string()))?;

    let (update, doc) = state
        .updates
        .upload(UpdateUpload {
            version,
            platform,
            arch,
            filename,
            binary,
            signature,
            notes,
        })
        .await?;
    state.metrics.record_upload();

    Ok((
        StatusCode::CREATED,
        Json(PublishedUpdate {
            update,
            latest_version: doc.version,
        }),
    ))
}

/// DELETE /api/v1/updates/{version}/{platform}/{arch}
pub async fn delete_update(
    State(state): State<Arc<ServerState>>,
    Path((version, platform, arch)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let (platform, arch) = parse_target(&platform, &arch)?;
    state.updates.delete(&version, platform, arch).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/updates/download/{version}/{platform}/{arch}/{filename}
pub async fn download_update(
    State(state): State<Arc<ServerState>>,
    Path((version, platform, arch, filename)): Path<(String, String, String, String)>,
) -> ApiResult<Response> {
    let (platform, arch) = parse_target(&platform, &arch)?;
    let (update, stream) = state
        .updates
        .open_binary(&version, platform, arch, &filename)
        .await?;

    tracing::info!(
        "Serving update {} for {}/{} ({} bytes)",
        update.version, platform, arch, update.file_size
    );
    state.metrics.record_download(update.file_size);

    Ok(stream_response(
        StreamedObject {
            filename: &update.filename,
            content_type: content_type_for(&update.filename),
            size: update.file_size,
            sha256: None,
        },
        stream,
    ))
}
