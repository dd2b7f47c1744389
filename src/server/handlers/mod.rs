// src/server/handlers/mod.rs
//! HTTP request handlers for the Depot server

pub mod admin;
pub mod download;
pub mod objects;
pub mod packages;
pub mod updates;

use crate::Error;
use crate::hash::{ContentDigest, DigestError, DigestedContent};
use crate::server::security::too_many_requests;
use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use axum::http::header::WWW_AUTHENTICATE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error response wrapper mapping `depot::Error` onto HTTP statuses
///
/// Server-side faults are logged in full and answered with a generic
/// message.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Storage(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Error::Storage(_) | Error::Database(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = ?self.0, "Request failed: {}", self.0);
            return (status, Json(json!({ "error": "Internal server error" }))).into_response();
        }

        match self.0 {
            Error::RateLimited => too_many_requests(),
            Error::Unauthorized => (
                status,
                [(WWW_AUTHENTICATE, "Bearer")],
                Json(json!({ "error": "Unauthorized" })),
            )
                .into_response(),
            Error::Storage(_) => (status, Json(json!({ "error": "Object not found" }))).into_response(),
            other => (status, Json(json!({ "error": other.to_string() }))).into_response(),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Map a multipart parsing failure, keeping body-limit rejections as 413
pub(crate) fn multipart_error(err: MultipartError, limit: u64) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError(Error::PayloadTooLarge { limit });
    }
    ApiError(Error::Validation(format!("malformed multipart body: {}", err.body_text())))
}

/// Stream a file field through the digest, enforcing `limit`
pub(crate) async fn read_file_field(mut field: Field<'_>, limit: u64) -> ApiResult<DigestedContent> {
    let mut digest = ContentDigest::with_limit(limit);
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
        digest.update(&chunk).map_err(|e| match e {
            DigestError::LimitExceeded { limit } => ApiError(Error::PayloadTooLarge { limit }),
        })?;
    }
    Ok(digest.finish())
}

/// Read a text field
pub(crate) async fn read_text_field(field: Field<'_>, limit: u64) -> ApiResult<String> {
    field.text().await.map_err(|e| multipart_error(e, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::NotFound("package x".into()), StatusCode::NOT_FOUND),
            (Error::Conflict("dup".into()), StatusCode::CONFLICT),
            (Error::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (Error::Unauthorized, StatusCode::UNAUTHORIZED),
            (Error::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (Error::PayloadTooLarge { limit: 1 }, StatusCode::PAYLOAD_TOO_LARGE),
            (Error::Storage(StorageError::NotFound("k".into())), StatusCode::NOT_FOUND),
            (
                Error::Storage(StorageError::Unavailable("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (Error::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::from(StorageError::InvalidKey("a/../b".into())), StatusCode::BAD_REQUEST),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_server_errors_hide_details() {
        use http_body_util::BodyExt;

        let response = ApiError(Error::Internal("secret path /etc/depot".into())).into_response();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("/etc/depot"));
        assert!(text.contains("Internal server error"));
    }
}
