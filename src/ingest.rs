// src/ingest.rs

//! Artifact ingestion
//!
//! Turns an uploaded file into a stored object plus a catalog record:
//! validate the name, hash the bytes, derive the content-addressed key
//! `packages/{sha256}/{filename}`, put the object, then record the file in a
//! single catalog transaction. Object storage is not transactional, so a
//! failed catalog write is followed by a best-effort delete of the object
//! when nothing else references it.
//!
//! Identical bytes under the same filename share one key. Writing a key and
//! recording it, or checking a key's references and deleting it, happen
//! under a per-key lock so an unreferenced-object sweep cannot remove bytes
//! an in-flight upload is about to record.

use crate::catalog::{self, Catalog};
use crate::db::models::{Package, PackageFile, Version, now_rfc3339};
use crate::error::{Error, Result};
use crate::hash::DigestedContent;
use crate::storage::{self, ObjectStore, ObjectStream};
use crate::updates::content_type_for;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

/// Lifetime of signed URLs handed out for redirect downloads
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// A fully buffered upload
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    /// Explicit content type; derived from the extension when `None`
    pub content_type: Option<String>,
    pub content: DigestedContent,
    pub release_notes: Option<String>,
    pub requirements: Option<Vec<String>>,
}

impl UploadedFile {
    /// Wrap already-digested content
    pub fn new(filename: impl Into<String>, content: DigestedContent) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            content,
            release_notes: None,
            requirements: None,
        }
    }

    /// Digest raw bytes
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::new(filename, DigestedContent::from_bytes(bytes.into()))
    }
}

/// Names that collide with fixed route segments next to `{filename}`
const RESERVED_FILENAMES: &[&str] = &["upload"];

/// Reject empty names, reserved route segments and anything that could act
/// as a path
pub fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("filename is required".to_string()));
    }
    if name == "." || name.contains("..") || name.contains(['/', '\\', '\0']) {
        return Err(Error::Validation(format!("unsafe filename: {}", name)));
    }
    if RESERVED_FILENAMES.contains(&name) {
        return Err(Error::Validation(format!("reserved filename: {}", name)));
    }
    Ok(())
}

/// Stable download path for a package file
pub fn download_path(package: &str, version: &str, filename: &str) -> String {
    format!("/api/v1/download/{}/{}/{}", package, version, filename)
}

/// Async locks keyed by storage key
///
/// Entries are dropped once their last holder or waiter goes away.
#[derive(Default)]
struct KeyLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

struct KeyGuard {
    locks: Arc<KeyLocks>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    async fn lock(self: &Arc<Self>, key: &str) -> KeyGuard {
        let slot = self.slots.lock().entry(key.to_string()).or_default().clone();
        let guard = slot.lock_owned().await;
        KeyGuard {
            locks: Arc::clone(self),
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock();
        self.guard.take();
        if slots.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&self.key);
        }
    }
}

/// Coordinates object storage and catalog writes for package files
#[derive(Clone)]
pub struct Ingestor {
    catalog: Catalog,
    store: Arc<dyn ObjectStore>,
    key_locks: Arc<KeyLocks>,
}

impl Ingestor {
    pub fn new(catalog: Catalog, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            catalog,
            store,
            key_locks: Arc::default(),
        }
    }

    /// Store an uploaded file and record it under `package_name`/`version`
    pub async fn upload_file(&self, package_name: &str, version: &str, upload: UploadedFile) -> Result<PackageFile> {
        validate_filename(&upload.filename)?;
        if version.is_empty() {
            return Err(Error::Validation("version is required".to_string()));
        }
        let package = self.require_package(package_name).await?;
        let package_id = package_id(&package)?;

        let UploadedFile {
            filename,
            content_type,
            content,
            release_notes,
            requirements,
        } = upload;

        let key = storage::package_file_key(&content.hash, &filename);
        let content_type = content_type.unwrap_or_else(|| content_type_for(&filename).to_string());
        let size = content.size();

        let key_guard = self.key_locks.lock(&key).await;
        self.store.put(&key, content.bytes, &content_type).await?;

        let file = PackageFile {
            id: None,
            name: filename.clone(),
            size,
            hash: content.hash,
            content_type,
            storage_key: key.clone(),
            download_url: download_path(package_name, version, &filename),
            uploaded_at: now_rfc3339(),
        };

        let recorded = {
            let catalog = self.catalog.clone();
            let version = version.to_string();
            let file = file.clone();
            catalog::blocking(move || {
                catalog.record_file(package_id, &version, file, release_notes, requirements)
            })
            .await
        };

        let recorded = match recorded {
            Ok(recorded) => recorded,
            Err(e) => {
                self.delete_unreferenced(&key).await;
                return Err(e);
            }
        };
        drop(key_guard);

        for old in &recorded.replaced {
            if old.storage_key != key {
                self.remove_if_unreferenced(&old.storage_key).await;
            }
        }

        info!(
            "Uploaded {} to {}@{} ({} bytes, sha256 {})",
            filename, package_name, version, size, file.hash
        );
        Ok(file)
    }

    /// Resolve a file and open its object for streaming
    pub async fn open_file(&self, package_name: &str, version: &str, filename: &str) -> Result<(PackageFile, ObjectStream)> {
        let file = self.find_file(package_name, version, filename).await?;
        let stream = self.store.get(&file.storage_key).await?;
        Ok((file, stream))
    }

    /// Resolve a file and mint a fresh signed URL for it
    pub async fn signed_url(&self, package_name: &str, version: &str, filename: &str) -> Result<(PackageFile, String)> {
        let file = self.find_file(package_name, version, filename).await?;
        let url = self
            .store
            .signed_read_url(&file.storage_key, DOWNLOAD_URL_TTL)
            .await?;
        Ok((file, url))
    }

    /// Strip a file from its version and drop the object once unreferenced
    ///
    /// The package and version records are kept even when the version's
    /// file list becomes empty.
    pub async fn delete_file(&self, package_name: &str, version: &str, filename: &str) -> Result<()> {
        let file = self.find_file(package_name, version, filename).await?;
        let package = self.require_package(package_name).await?;
        let package_id = package_id(&package)?;

        let removed = {
            let catalog = self.catalog.clone();
            let version = version.to_string();
            let filename = filename.to_string();
            catalog::blocking(move || catalog.remove_file_from_version(package_id, &version, &filename)).await?
        };
        if removed == 0 {
            return Err(Error::NotFound(format!("file '{}'", filename)));
        }

        self.remove_if_unreferenced(&file.storage_key).await;
        info!("Deleted {} from {}@{}", filename, package_name, version);
        Ok(())
    }

    /// Look up a package by name, mapping absence to `Error::NotFound`
    pub async fn require_package(&self, name: &str) -> Result<Package> {
        let catalog = self.catalog.clone();
        let lookup = name.to_string();
        catalog::blocking(move || catalog.get_package(&lookup))
            .await?
            .ok_or_else(|| Error::NotFound(format!("package '{}'", name)))
    }

    /// Look up a version of a package
    pub async fn require_version(&self, package_name: &str, version: &str) -> Result<Version> {
        let package = self.require_package(package_name).await?;
        let package_id = package_id(&package)?;
        let catalog = self.catalog.clone();
        let lookup = version.to_string();
        catalog::blocking(move || catalog.get_version(package_id, &lookup))
            .await?
            .ok_or_else(|| Error::NotFound(format!("version '{}'", version)))
    }

    async fn find_file(&self, package_name: &str, version: &str, filename: &str) -> Result<PackageFile> {
        let version = self.require_version(package_name, version).await?;
        version
            .file(filename)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("file '{}'", filename)))
    }

    /// Delete `key` if no file record references it; failures are logged
    async fn remove_if_unreferenced(&self, key: &str) {
        let _guard = self.key_locks.lock(key).await;
        self.delete_unreferenced(key).await;
    }

    /// As `remove_if_unreferenced`, for callers already holding the key lock
    async fn delete_unreferenced(&self, key: &str) {
        let catalog = self.catalog.clone();
        let lookup = key.to_string();
        match catalog::blocking(move || catalog.count_file_references(&lookup)).await {
            Ok(0) => {
                if let Err(e) = self.store.delete(key).await {
                    warn!("Failed to remove orphaned object {}: {}", key, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Could not check references for {}: {}", key, e),
        }
    }
}

fn package_id(package: &Package) -> Result<i64> {
    package
        .id
        .ok_or_else(|| Error::Internal(format!("package '{}' has no ID", package.name)))
}
