// src/storage/mod.rs

//! Object storage for artifact bytes
//!
//! The registry never talks to a storage backend directly. Everything goes
//! through the [`ObjectStore`] trait so that S3-compatible services (AWS, R2,
//! MinIO) and a plain local directory are interchangeable.
//!
//! Keys are `/`-separated relative paths such as
//! `packages/{sha256}/{filename}`. They are validated before use so that a
//! key can never address anything outside the store's namespace.

mod local;
mod s3;

pub use self::local::{LocalObjectStore, SignedUrlError};
pub use self::s3::{S3Config, S3ObjectStore};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Stream of object bytes returned by [`ObjectStore::get`]
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;

/// Object storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage permission denied: {0}")]
    PermissionDenied(String),

    #[error("object {key} still present after {waited:?}")]
    Timeout { key: String, waited: Duration },

    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// How long `delete` waits for the object to disappear
#[derive(Debug, Clone, Copy)]
pub struct DeleteWait {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for DeleteWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            interval: Duration::from_millis(250),
        }
    }
}

/// Capability interface over a blob storage backend
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, replacing any existing object
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Open an object for reading
    async fn get(&self, key: &str) -> StorageResult<ObjectStream>;

    /// Size of an object in bytes
    async fn size(&self, key: &str) -> StorageResult<u64>;

    /// Delete an object and wait until the backend no longer reports it
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Time-limited URL granting read access to one object
    async fn signed_read_url(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Confirm the backend is reachable and usable
    async fn verify_access(&self) -> StorageResult<()>;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Poll `exists` until the object is gone or the wait expires
pub(crate) async fn wait_until_absent<S>(store: &S, key: &str, wait: DeleteWait) -> StorageResult<()>
where
    S: ObjectStore + ?Sized,
{
    let started = tokio::time::Instant::now();
    loop {
        if !store.exists(key).await? {
            debug!("Confirmed deletion of {} after {:?}", key, started.elapsed());
            return Ok(());
        }
        let waited = started.elapsed();
        if waited >= wait.timeout {
            return Err(StorageError::Timeout {
                key: key.to_string(),
                waited,
            });
        }
        tokio::time::sleep(wait.interval).await;
    }
}

/// Reject keys that are empty, absolute, or contain traversal segments
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Key for a package file: `packages/{sha256}/{filename}`
pub fn package_file_key(hash: &str, filename: &str) -> String {
    format!("packages/{}/{}", hash, filename)
}

/// Key for an update binary: `updates/{version}/{platform}/{arch}/{filename}`
pub fn update_binary_key(version: &str, platform: &str, arch: &str, filename: &str) -> String {
    format!("updates/{}/{}/{}/{}", version, platform, arch, filename)
}

/// Key for the detached signature stored next to an update binary
pub fn update_signature_key(binary_key: &str) -> String {
    format!("{}.sig", binary_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("packages/abc/tool.zip").is_ok());
        assert!(validate_key("updates/1.0.0/linux/x86_64/app.tar.gz").is_ok());

        for bad in ["", "/etc/passwd", "packages/../secret", "a//b", "a/./b", "a\\b"] {
            assert!(
                matches!(validate_key(bad), Err(StorageError::InvalidKey(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(package_file_key("ab12", "tool.zip"), "packages/ab12/tool.zip");
        let key = update_binary_key("1.2.0", "darwin", "aarch64", "App.dmg");
        assert_eq!(key, "updates/1.2.0/darwin/aarch64/App.dmg");
        assert_eq!(update_signature_key(&key), "updates/1.2.0/darwin/aarch64/App.dmg.sig");
    }
}
