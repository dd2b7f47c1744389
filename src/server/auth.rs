// src/server/auth.rs
//! Authorization gate for write and admin endpoints
//!
//! Credentials are opaque: an `X-API-Key` header or an `Authorization:
//! Bearer` token is accepted when it matches a configured value. Only the
//! SHA-256 digests of configured credentials are kept in memory, and the
//! presented credential is digested before comparison.

use crate::server::ServerState;
use crate::server::handlers::ApiError;
use crate::Error;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Header carrying an API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Kind of credential that was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    ApiKey,
    BearerToken,
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Granted(Credential),
    Denied,
}

/// Decides whether a request may use protected endpoints
pub trait Authorizer: Send + Sync {
    fn authorize(&self, headers: &HeaderMap) -> Authorization;
}

/// Authorizer backed by fixed lists of API keys and bearer tokens
#[derive(Default)]
pub struct StaticAuthorizer {
    api_keys: HashSet<[u8; 32]>,
    bearer_tokens: HashSet<[u8; 32]>,
}

impl StaticAuthorizer {
    pub fn new<K, T>(api_keys: K, bearer_tokens: T) -> Self
    where
        K: IntoIterator,
        K::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        Self {
            api_keys: digest_all(api_keys),
            bearer_tokens: digest_all(bearer_tokens),
        }
    }

    /// Whether any credential is configured at all
    pub fn is_empty(&self) -> bool {
        self.api_keys.is_empty() && self.bearer_tokens.is_empty()
    }
}

impl Authorizer for StaticAuthorizer {
    fn authorize(&self, headers: &HeaderMap) -> Authorization {
        if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
            && self.api_keys.contains(&digest(key))
        {
            return Authorization::Granted(Credential::ApiKey);
        }

        if let Some(token) = bearer_token(headers)
            && self.bearer_tokens.contains(&digest(token))
        {
            return Authorization::Granted(Credential::BearerToken);
        }

        Authorization::Denied
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

fn digest_all<I>(values: I) -> HashSet<[u8; 32]>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    values
        .into_iter()
        .filter(|v| !v.as_ref().is_empty())
        .map(|v| digest(v.as_ref()))
        .collect()
}

/// Axum middleware rejecting requests the authorizer denies
pub async fn require_auth(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    match state.authorizer.authorize(request.headers()) {
        Authorization::Granted(credential) => {
            debug!(?credential, path = %request.uri().path(), "Authorized request");
            next.run(request).await
        }
        Authorization::Denied => ApiError(Error::Unauthorized).into_response(),
    }
}
