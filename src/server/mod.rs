// src/server/mod.rs
//! Depot HTTP server
//!
//! This module provides an HTTP server that:
//! - Serves the package catalog and streams package files
//! - Accepts authenticated uploads of package files and update binaries
//! - Publishes the latest-version feed for auto-update clients
//! - Serves signed object URLs for the local storage backend
//!
//! Downloads are rate limited per client; write endpoints sit behind the
//! authorization gate.

pub mod auth;
pub mod config;
mod handlers;
pub mod metrics;
mod routes;
pub mod security;

pub use auth::{Authorization, Authorizer, Credential, StaticAuthorizer};
pub use config::DepotConfig;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use routes::create_router;
pub use security::{RateLimitConfig, RateLimiter};

use crate::catalog::{self, Catalog};
use crate::ingest::Ingestor;
use crate::storage::{DeleteWait, LocalObjectStore, ObjectStore, S3Config, S3ObjectStore};
use crate::updates::UpdateService;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which object store backs the registry
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// Filesystem store under `root`, with HMAC-signed URLs served by this server
    Local { root: PathBuf, signing_secret: String },
    S3(S3Config),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Externally visible base URL, without a trailing slash
    pub public_url: String,
    /// Path to the catalog database
    pub db_path: PathBuf,
    pub storage: StorageBackend,
    /// Answer package downloads with a redirect to a signed URL
    pub redirect_downloads: bool,
    pub delete_wait: DeleteWait,
    pub request_timeout: Duration,
    /// Largest accepted request body in bytes
    pub max_upload_size: u64,
    /// CORS allowed origins (empty = same-origin only)
    pub cors_allowed_origins: Vec<String>,
    /// Header holding the real client IP when behind a proxy
    pub trusted_proxy_header: Option<String>,
    /// `None` disables download rate limiting
    pub rate_limit: Option<RateLimitConfig>,
    /// How often idle rate limit buckets are swept
    pub sweep_interval: Duration,
    pub api_keys: Vec<String>,
    pub bearer_tokens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            public_url: "http://localhost:8080".to_string(),
            db_path: PathBuf::from("/var/lib/depot/depot.db"),
            storage: StorageBackend::Local {
                root: PathBuf::from("/var/lib/depot"),
                signing_secret: String::new(),
            },
            redirect_downloads: false,
            delete_wait: DeleteWait::default(),
            request_timeout: Duration::from_secs(300),
            max_upload_size: 2 * 1024 * 1024 * 1024,
            cors_allowed_origins: Vec::new(),
            trusted_proxy_header: None,
            rate_limit: Some(RateLimitConfig {
                requests_per_second: 1.0,
                burst: 5,
                idle_expiry: Duration::from_secs(300),
            }),
            sweep_interval: Duration::from_secs(60),
            api_keys: Vec::new(),
            bearer_tokens: Vec::new(),
        }
    }
}

/// Shared server state
///
/// Everything here is either immutable or synchronizes internally, so
/// handlers share it through a plain `Arc`.
pub struct ServerState {
    pub config: ServerConfig,
    pub catalog: Catalog,
    pub store: Arc<dyn ObjectStore>,
    /// Set when the local backend is in use; verifies signed object URLs
    pub local_store: Option<Arc<LocalObjectStore>>,
    pub ingestor: Ingestor,
    pub updates: UpdateService,
    /// Download rate limiter, if enabled
    pub limiter: Option<Arc<RateLimiter>>,
    pub metrics: Arc<ServerMetrics>,
    pub authorizer: Arc<dyn Authorizer>,
}

impl ServerState {
    /// Open the catalog and connect the configured object store
    pub async fn build(config: ServerConfig) -> Result<Self> {
        let db_path = config.db_path.clone();
        let catalog = catalog::blocking(move || Catalog::open(&db_path))
            .await
            .with_context(|| format!("Failed to open catalog at {}", config.db_path.display()))?;

        let (store, local_store) = match &config.storage {
            StorageBackend::Local { root, signing_secret } => {
                let local = Arc::new(
                    LocalObjectStore::new(root, &config.public_url, signing_secret.as_bytes())?
                        .with_delete_wait(config.delete_wait),
                );
                local
                    .verify_access()
                    .await
                    .with_context(|| format!("Local storage at {} is not usable", root.display()))?;
                let store: Arc<dyn ObjectStore> = local.clone();
                (store, Some(local))
            }
            StorageBackend::S3(s3) => {
                let store = S3ObjectStore::connect(s3)
                    .await
                    .with_context(|| format!("Failed to connect to bucket '{}'", s3.bucket))?
                    .with_delete_wait(config.delete_wait);
                (Arc::new(store) as Arc<dyn ObjectStore>, None)
            }
        };

        Ok(Self::from_parts(config, catalog, store, local_store))
    }

    /// Assemble state from an already opened catalog and store
    pub fn from_parts(
        config: ServerConfig,
        catalog: Catalog,
        store: Arc<dyn ObjectStore>,
        local_store: Option<Arc<LocalObjectStore>>,
    ) -> Self {
        let ingestor = Ingestor::new(catalog.clone(), store.clone());
        let updates = UpdateService::new(catalog.clone(), store.clone());
        let limiter = config.rate_limit.map(|limits| Arc::new(RateLimiter::new(limits)));
        let authorizer = StaticAuthorizer::new(&config.api_keys, &config.bearer_tokens);

        Self {
            config,
            catalog,
            store,
            local_store,
            ingestor,
            updates,
            limiter,
            metrics: Arc::new(ServerMetrics::new()),
            authorizer: Arc::new(authorizer),
        }
    }
}

/// Start the Depot server and run until Ctrl-C
pub async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!("Starting Depot server on {}", config.bind_addr);
    tracing::info!("Catalog: {:?}", config.db_path);
    tracing::info!("Public URL: {}", config.public_url);

    if let Some(limits) = &config.rate_limit {
        tracing::info!(
            "Download rate limiting: {} rps, {} burst",
            limits.requests_per_second,
            limits.burst
        );
    }

    let bind_addr = config.bind_addr;
    let sweep_interval = config.sweep_interval;
    let state = Arc::new(ServerState::build(config).await?);
    tracing::info!("Object storage: {}", state.store.backend_name());

    if let Some(limiter) = &state.limiter {
        limiter.clone().spawn_sweeper(sweep_interval);
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Depot is ready to serve");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Depot server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
