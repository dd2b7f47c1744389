// src/server/handlers/download.rs
//! Package file downloads
//!
//! Files are streamed from the object store, or, when
//! `storage.redirect_downloads` is set, answered with a temporary redirect to
//! a freshly signed object URL.

use super::ApiResult;
use crate::server::ServerState;
use crate::storage::ObjectStream;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderName,
};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use std::sync::Arc;

/// Header carrying the content's SHA-256
pub const CONTENT_SHA256: HeaderName = HeaderName::from_static("x-content-sha256");

/// Metadata for a streamed object
pub(crate) struct StreamedObject<'a> {
    pub filename: &'a str,
    pub content_type: &'a str,
    pub size: u64,
    pub sha256: Option<&'a str>,
}

/// Build a streaming 200 response for an object
pub(crate) fn stream_response(object: StreamedObject<'_>, stream: ObjectStream) -> Response {
    let safe_name = object.filename.replace(['"', '\\'], "_");
    let mut response = (
        StatusCode::OK,
        [
            (CONTENT_TYPE, object.content_type.to_string()),
            (CONTENT_LENGTH, object.size.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", safe_name),
            ),
            (CACHE_CONTROL, "public, max-age=300".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response();

    if let Some(hash) = object.sha256
        && let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", hash))
        && let Ok(digest) = HeaderValue::from_str(hash)
    {
        let headers = response.headers_mut();
        headers.insert(ETAG, etag);
        headers.insert(CONTENT_SHA256, digest);
    }

    response
}

/// GET /api/v1/download/{name}/{version}/{filename}
pub async fn download_file(
    State(state): State<Arc<ServerState>>,
    Path((name, version, filename)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    if state.config.redirect_downloads {
        let (file, url) = state.ingestor.signed_url(&name, &version, &filename).await?;
        tracing::debug!("Redirecting download of {} to signed URL", file.storage_key);
        state.metrics.record_download(0);
        return Ok(Redirect::temporary(&url).into_response());
    }

    let (file, stream) = state.ingestor.open_file(&name, &version, &filename).await?;
    tracing::info!("Serving {} from {}@{} ({} bytes)", filename, name, version, file.size);
    state.metrics.record_download(file.size);

    Ok(stream_response(
        StreamedObject {
            filename: &file.name,
            content_type: &file.content_type,
            size: file.size,
            sha256: Some(&file.hash),
        },
        stream,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;

    #[test]
    fn test_stream_response_headers() {
        let stream = futures::stream::iter([Ok(Bytes::from_static(b"abc"))]).boxed();
        let response = stream_response(
            StreamedObject {
                filename: "a\"b.tar.gz",
                content_type: "application/x-gzip",
                size: 3,
                sha256: Some("deadbeef"),
            },
            stream,
        );

        let headers = response.headers();
        assert_eq!(headers[CONTENT_LENGTH], "3");
        assert_eq!(headers[CONTENT_TYPE], "application/x-gzip");
        assert_eq!(headers[ETAG], "\"deadbeef\"");
        assert_eq!(headers[CONTENT_SHA256], "deadbeef");
        assert_eq!(headers[CONTENT_DISPOSITION], "attachment; filename=\"a_b.tar.gz\"");
    }
}
