// src/server/config.rs
//! Configuration file parsing for the Depot server
//!
//! Supports TOML configuration files with the following sections:
//! - [server] - Bind address, public URL, request limits, CORS
//! - [storage] - Backend selection, data root, catalog path
//! - [s3] - Bucket settings for the S3 backend
//! - [local] - Signing secret for the filesystem backend
//! - [auth] - Accepted API keys and bearer tokens
//! - [rate_limit] - Per-client download limiting
//!
//! Secrets can be supplied through `DEPOT_*` environment variables instead
//! of the file.

use crate::server::security::RateLimitConfig;
use crate::server::{ServerConfig, StorageBackend};
use crate::storage::{DeleteWait, S3Config};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
pub struct DepotConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub s3: S3Section,

    #[serde(default)]
    pub local: LocalSection,

    #[serde(default)]
    pub auth: AuthSection,

    #[serde(default)]
    pub rate_limit: RateLimitSection,
}

/// Server configuration section
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Public API bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Externally visible base URL, used for absolute links and signed URLs
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Per-request deadline (e.g., "5m")
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// Largest accepted request body (e.g., "2GB")
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: String,

    /// CORS allowed origins (empty = same-origin only)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Trusted proxy header for real IP extraction (e.g., "X-Forwarded-For")
    #[serde(default)]
    pub trusted_proxy_header: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
            request_timeout: default_request_timeout(),
            max_upload_size: default_max_upload_size(),
            cors_origins: Vec::new(),
            trusted_proxy_header: None,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> String {
    "5m".to_string()
}

fn default_max_upload_size() -> String {
    "2GB".to_string()
}

fn default_true() -> bool {
    true
}

/// Storage configuration section
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    /// "local" or "s3"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Data root (local objects and the default catalog location)
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Catalog database path (default: {root}/depot.db)
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Answer package downloads with a redirect to a signed URL
    #[serde(default)]
    pub redirect_downloads: bool,

    /// Upper bound on waiting for a deleted object to disappear
    #[serde(default = "default_delete_timeout")]
    pub delete_timeout: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: default_root(),
            database: None,
            redirect_downloads: false,
            delete_timeout: default_delete_timeout(),
        }
    }
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from("/var/lib/depot")
}

fn default_delete_timeout() -> String {
    "30s".to_string()
}

/// S3-compatible bucket settings
#[derive(Debug, Deserialize)]
pub struct S3Section {
    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for R2/MinIO
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_key_id: String,

    #[serde(default)]
    pub secret_access_key: String,

    #[serde(default = "default_true")]
    pub path_style: bool,
}

impl Default for S3Section {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            path_style: true,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Filesystem backend settings
#[derive(Debug, Default, Deserialize)]
pub struct LocalSection {
    /// HMAC key for signed object URLs
    #[serde(default)]
    pub signing_secret: String,
}

/// Credentials accepted by the authorization gate
#[derive(Debug, Default, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default)]
    pub bearer_tokens: Vec<String>,
}

/// Download rate limiting
#[derive(Debug, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Token refill rate per client
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Bucket capacity per client
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Buckets idle longer than this are dropped
    #[serde(default = "default_idle_expiry")]
    pub idle_expiry: String,

    /// How often idle buckets are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            idle_expiry: default_idle_expiry(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_requests_per_second() -> f64 {
    1.0
}

fn default_burst() -> u32 {
    5
}

fn default_idle_expiry() -> String {
    "5m".to_string()
}

fn default_sweep_interval() -> String {
    "1m".to_string()
}

impl DepotConfig {
    /// Load configuration from a TOML file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: DepotConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override secrets from `DEPOT_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Override secrets using `lookup` as the environment
    ///
    /// List variables are comma separated.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DEPOT_S3_ACCESS_KEY_ID") {
            self.s3.access_key_id = v;
        }
        if let Some(v) = lookup("DEPOT_S3_SECRET_ACCESS_KEY") {
            self.s3.secret_access_key = v;
        }
        if let Some(v) = lookup("DEPOT_SIGNING_SECRET") {
            self.local.signing_secret = v;
        }
        if let Some(v) = lookup("DEPOT_API_KEYS") {
            self.auth.api_keys = split_list(&v);
        }
        if let Some(v) = lookup("DEPOT_BEARER_TOKENS") {
            self.auth.bearer_tokens = split_list(&v);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid server.bind address: {}", self.server.bind))?;

        url::Url::parse(&self.server.public_url)
            .with_context(|| format!("Invalid server.public_url: {}", self.server.public_url))?;

        parse_duration(&self.server.request_timeout).context("Invalid server.request_timeout")?;
        parse_size(&self.server.max_upload_size).context("Invalid server.max_upload_size")?;
        parse_duration(&self.storage.delete_timeout).context("Invalid storage.delete_timeout")?;

        match self.storage.backend.as_str() {
            "local" => {
                if self.local.signing_secret.is_empty() {
                    anyhow::bail!(
                        "local.signing_secret (or DEPOT_SIGNING_SECRET) is required for the local backend"
                    );
                }
            }
            "s3" => {
                if self.s3.bucket.is_empty() {
                    anyhow::bail!("s3.bucket is required for the s3 backend");
                }
                if self.s3.access_key_id.is_empty() || self.s3.secret_access_key.is_empty() {
                    anyhow::bail!("s3 credentials are required for the s3 backend");
                }
            }
            other => anyhow::bail!("storage.backend must be \"local\" or \"s3\", got '{}'", other),
        }

        if self.rate_limit.enabled {
            let rps = self.rate_limit.requests_per_second;
            if !rps.is_finite() || rps <= 0.0 {
                anyhow::bail!(
                    "rate_limit.requests_per_second must be positive, got {}",
                    self.rate_limit.requests_per_second
                );
            }
            if self.rate_limit.burst == 0 {
                anyhow::bail!("rate_limit.burst must be at least 1");
            }
            parse_duration(&self.rate_limit.idle_expiry).context("Invalid rate_limit.idle_expiry")?;
            parse_duration(&self.rate_limit.sweep_interval)
                .context("Invalid rate_limit.sweep_interval")?;
        }

        if self.auth.api_keys.is_empty() && self.auth.bearer_tokens.is_empty() {
            warn!("No API keys or bearer tokens configured; all write endpoints will reject requests");
        }

        Ok(())
    }

    /// Convert to the internal ServerConfig structure
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let bind_addr = self.server.bind.parse()?;

        let storage = match self.storage.backend.as_str() {
            "s3" => StorageBackend::S3(S3Config {
                bucket: self.s3.bucket.clone(),
                region: self.s3.region.clone(),
                endpoint: self.s3.endpoint.clone(),
                access_key_id: self.s3.access_key_id.clone(),
                secret_access_key: self.s3.secret_access_key.clone(),
                path_style: self.s3.path_style,
            }),
            _ => StorageBackend::Local {
                root: self.storage.root.clone(),
                signing_secret: self.local.signing_secret.clone(),
            },
        };

        let rate_limit = if self.rate_limit.enabled {
            Some(RateLimitConfig {
                requests_per_second: self.rate_limit.requests_per_second,
                burst: self.rate_limit.burst,
                idle_expiry: parse_duration(&self.rate_limit.idle_expiry)?,
            })
        } else {
            None
        };

        Ok(ServerConfig {
            bind_addr,
            public_url: self.server.public_url.trim_end_matches('/').to_string(),
            db_path: self.database_path(),
            storage,
            redirect_downloads: self.storage.redirect_downloads,
            delete_wait: DeleteWait {
                timeout: parse_duration(&self.storage.delete_timeout)?,
                ..DeleteWait::default()
            },
            request_timeout: parse_duration(&self.server.request_timeout)?,
            max_upload_size: parse_size(&self.server.max_upload_size)?,
            cors_allowed_origins: self.server.cors_origins.clone(),
            trusted_proxy_header: self.server.trusted_proxy_header.clone(),
            rate_limit,
            sweep_interval: parse_duration(&self.rate_limit.sweep_interval)?,
            api_keys: self.auth.api_keys.clone(),
            bearer_tokens: self.auth.bearer_tokens.clone(),
        })
    }

    /// Catalog database location
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database
            .clone()
            .unwrap_or_else(|| self.storage.root.join("depot.db"))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a human-readable size string (e.g., "2GB", "512MB")
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("TB") {
        (n, 1024u64 * 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1024u64 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1024u64 * 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024u64)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1u64)
    } else {
        // Assume bytes
        (s.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid size number: {}", num_str))?;
    if num < 0.0 {
        anyhow::bail!("Size must not be negative: {}", s);
    }

    Ok((num * multiplier as f64) as u64)
}

/// Parse a human-readable duration string (e.g., "15m", "1h", "30s")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('d') {
        (n, 24 * 60 * 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60 * 60)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else {
        // Assume seconds
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration number: {}", num_str))?;

    Ok(Duration::from_secs(num * multiplier))
}
