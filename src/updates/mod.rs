// src/updates/mod.rs

//! Application self-update binaries
//!
//! Each binary is identified by (version, platform, arch) and stored with a
//! detached signature next to it:
//!
//! ```text
//! updates/{version}/{platform}/{arch}/{filename}
//! updates/{version}/{platform}/{arch}/{filename}.sig
//! ```
//!
//! Publishing a binary also merges it into the latest-version aggregate in
//! the same catalog transaction (see [`aggregate`]).

pub mod aggregate;
pub mod platform;

pub use platform::{Arch, Platform, all_platform_keys, platform_key};

use crate::catalog::{self, Catalog};
use crate::db::models::{LatestVersionAggregate, UpdateBinary};
use crate::error::{Error, Result};
use crate::hash::DigestedContent;
use crate::ingest::validate_filename;
use crate::storage::{ObjectStore, ObjectStream};
use crate::version;
use std::sync::Arc;
use tracing::{info, warn};

/// Content type for a filename, by extension
pub fn content_type_for(filename: &str) -> &'static str {
    let name = filename.to_ascii_lowercase();
    let by_suffix = [
        (".tar.gz", "application/x-gzip"),
        (".tgz", "application/x-gzip"),
        (".tar.xz", "application/x-xz"),
        (".tar.bz2", "application/x-bzip2"),
        (".zip", "application/zip"),
        (".dmg", "application/x-apple-diskimage"),
        (".deb", "application/vnd.debian.binary-package"),
        (".rpm", "application/x-rpm"),
    ];
    by_suffix
        .iter()
        .find(|(suffix, _)| name.ends_with(suffix))
        .map(|(_, content_type)| *content_type)
        .unwrap_or("application/octet-stream")
}

/// An update binary upload
#[derive(Debug, Clone)]
pub struct UpdateUpload {
    /// Version as supplied; a leading `v` is stripped
    pub version: String,
    pub platform: Platform,
    pub arch: Arch,
    pub filename: String,
    pub binary: DigestedContent,
    /// Verbatim signature text
    pub signature: String,
    pub notes: String,
}

/// Manages update binaries and the latest-version feed
#[derive(Clone)]
pub struct UpdateService {
    catalog: Catalog,
    store: Arc<dyn ObjectStore>,
}

impl UpdateService {
    pub fn new(catalog: Catalog, store: Arc<dyn ObjectStore>) -> Self {
        Self { catalog, store }
    }

    /// Store a binary and its signature, then publish it
    ///
    /// The identity is reserved in the catalog before any object is written,
    /// so a concurrent upload of the same (version, platform, arch) fails
    /// with `Error::Conflict` without touching the stored objects. Returns
    /// the stored record and the aggregate after the merge.
    pub async fn upload(&self, upload: UpdateUpload) -> Result<(UpdateBinary, LatestVersionAggregate)> {
        let version = version::normalize(&upload.version).to_string();
        if version.is_empty() {
            return Err(Error::Validation("version is required".to_string()));
        }
        validate_filename(&upload.filename)?;
        if upload.signature.is_empty() {
            return Err(Error::Validation("signature is required".to_string()));
        }

        let mut update = UpdateBinary::new(
            &version,
            upload.platform,
            upload.arch,
            &upload.filename,
            upload.binary.size(),
            &upload.signature,
        );
        update.notes = upload.notes;

        let update = {
            let catalog = self.catalog.clone();
            catalog::blocking(move || {
                catalog.reserve_update(&mut update)?;
                Ok(update)
            })
            .await?
        };

        let binary_key = update.storage_key();
        let signature_key = update.signature_key();

        if let Err(e) = self
            .store
            .put(&binary_key, upload.binary.bytes, content_type_for(&upload.filename))
            .await
        {
            self.abandon(&update, &[]).await;
            return Err(e.into());
        }
        if let Err(e) = self
            .store
            .put(&signature_key, upload.signature.into_bytes().into(), "text/plain")
            .await
        {
            self.abandon(&update, &[&binary_key]).await;
            return Err(e.into());
        }

        let published = {
            let catalog = self.catalog.clone();
            let mut update = update.clone();
            catalog::blocking(move || {
                let doc = catalog.publish_update(&mut update)?;
                Ok((update, doc))
            })
            .await
        };

        match published {
            Ok((update, doc)) => {
                info!(
                    "Published update {} for {}/{} ({} bytes)",
                    update.version, update.platform, update.arch, update.file_size
                );
                Ok((update, doc))
            }
            Err(e) => {
                self.abandon(&update, &[&binary_key, &signature_key]).await;
                Err(e)
            }
        }
    }

    /// Delete an update binary, its signature and its record
    ///
    /// The aggregate is left as is.
    pub async fn delete(&self, version: &str, platform: Platform, arch: Arch) -> Result<()> {
        let version = version::normalize(version).to_string();
        let update = self
            .find(&version, platform, arch)
            .await?
            .ok_or_else(|| Error::NotFound(format!("update {} for {}/{}", version, platform, arch)))?;

        self.store.delete(&update.storage_key()).await?;
        if let Err(e) = self.store.delete(&update.signature_key()).await {
            warn!("Failed to delete signature {}: {}", update.signature_key(), e);
        }

        let catalog = self.catalog.clone();
        let removed = catalog::blocking(move || catalog.delete_update(&version, platform, arch)).await?;
        if !removed {
            return Err(Error::NotFound(format!("update {} for {}/{}", update.version, platform, arch)));
        }

        info!("Deleted update {} for {}/{}", update.version, platform, arch);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<UpdateBinary>> {
        let catalog = self.catalog.clone();
        catalog::blocking(move || catalog.list_updates()).await
    }

    /// Highest version published for one platform/arch pair
    pub async fn latest_for(&self, platform: Platform, arch: Arch) -> Result<UpdateBinary> {
        let catalog = self.catalog.clone();
        catalog::blocking(move || catalog.latest_update_for(platform, arch))
            .await?
            .ok_or_else(|| Error::NotFound(format!("update for {}/{}", platform, arch)))
    }

    /// The aggregate as served to clients
    ///
    /// Only the fixed platform keys are emitted, and non-empty URLs are made
    /// absolute with `public_base`.
    pub async fn latest_document(&self, public_base: &str) -> Result<LatestVersionAggregate> {
        let catalog = self.catalog.clone();
        let stored = catalog::blocking(move || catalog.get_latest_version_doc())
            .await?
            .ok_or_else(|| Error::NotFound("latest version".to_string()))?;
        Ok(render_document(stored, public_base))
    }

    /// Open an update binary for streaming
    pub async fn open_binary(
        &self,
        version: &str,
        platform: Platform,
        arch: Arch,
        filename: &str,
    ) -> Result<(UpdateBinary, ObjectStream)> {
        let version = version::normalize(version);
        let update = self
            .find(version, platform, arch)
            .await?
            .filter(|u| u.filename == filename)
            .ok_or_else(|| Error::NotFound(format!("update file '{}'", filename)))?;
        let stream = self.store.get(&update.storage_key()).await?;
        Ok((update, stream))
    }

    async fn find(&self, version: &str, platform: Platform, arch: Arch) -> Result<Option<UpdateBinary>> {
        let catalog = self.catalog.clone();
        let version = version.to_string();
        catalog::blocking(move || catalog.find_update(&version, platform, arch)).await
    }

    /// Remove the objects of a failed upload, then its reservation
    async fn abandon(&self, update: &UpdateBinary, keys: &[&str]) {
        for key in keys {
            if let Err(e) = self.store.delete(key).await {
                warn!("Failed to clean up {}: {}", key, e);
            }
        }

        let catalog = self.catalog.clone();
        let reserved = update.clone();
        if let Err(e) = catalog::blocking(move || catalog.release_update(&reserved)).await {
            warn!(
                "Failed to release reservation for update {} for {}/{}: {}",
                update.version, update.platform, update.arch, e
            );
        }
    }
}

fn render_document(mut stored: LatestVersionAggregate, public_base: &str) -> LatestVersionAggregate {
    let base = public_base.trim_end_matches('/');
    let mut platforms = std::mem::take(&mut stored.platforms);

    stored.platforms = all_platform_keys()
        .map(|key| {
            let mut entry = platforms.remove(&key).unwrap_or_default();
            if entry.url.starts_with('/') {
                entry.url = format!("{}{}", base, entry.url);
            }
            (key, entry)
        })
        .collect();
    stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PlatformEntry;
    use crate::storage::LocalObjectStore;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    fn service() -> (TempDir, Arc<LocalObjectStore>, UpdateService) {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path().join("depot.db")).unwrap();
        let store = Arc::new(
            LocalObjectStore::new(dir.path().join("store"), "http://localhost:8080", b"secret").unwrap(),
        );
        let service = UpdateService::new(catalog, store.clone());
        (dir, store, service)
    }

    fn upload(version: &str, platform: Platform, arch: Arch) -> UpdateUpload {
        UpdateUpload {
            version: version.to_string(),
            platform,
            arch,
            filename: "app.tar.gz".to_string(),
            binary: DigestedContent::from_bytes(format!("binary {version}").into()),
            signature: format!("sig {version}"),
            notes: format!("notes {version}"),
        }
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("App.dmg"), "application/x-apple-diskimage");
        assert_eq!(content_type_for("app.tar.gz"), "application/x-gzip");
        assert_eq!(content_type_for("app.zip"), "application/zip");
        assert_eq!(content_type_for("setup.exe"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_upload_stores_binary_and_signature() {
        let (_dir, store, service) = service();
        let (update, doc) = service
            .upload(upload("v1.0.0", Platform::Linux, Arch::X86_64))
            .await
            .unwrap();

        assert_eq!(update.version, "1.0.0");
        assert!(store.exists(&update.storage_key()).await.unwrap());
        let sig: Vec<bytes::Bytes> = store
            .get(&update.signature_key())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(sig.concat(), b"sig v1.0.0");
        assert_eq!(doc.version, "1.0.0");
        assert_eq!(doc.platforms["linux-x86_64"].signature, "sig v1.0.0");
    }

    #[tokio::test]
    async fn test_duplicate_upload_conflicts() {
        let (_dir, _store, service) = service();
        service
            .upload(upload("1.0.0", Platform::Darwin, Arch::Aarch64))
            .await
            .unwrap();
        let err = service
            .upload(upload("v1.0.0", Platform::Darwin, Arch::Aarch64))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_missing_signature_rejected() {
        let (_dir, _store, service) = service();
        let mut u = upload("1.0.0", Platform::Linux, Arch::X86_64);
        u.signature.clear();
        assert!(matches!(service.upload(u).await.unwrap_err(), Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_objects_and_record() {
        let (_dir, store, service) = service();
        let (update, _) = service
            .upload(upload("2.0.0", Platform::Windows, Arch::X86_64))
            .await
            .unwrap();

        service.delete("2.0.0", Platform::Windows, Arch::X86_64).await.unwrap();
        assert!(!store.exists(&update.storage_key()).await.unwrap());
        assert!(!store.exists(&update.signature_key()).await.unwrap());
        assert!(service.list().await.unwrap().is_empty());

        let err = service
            .delete("2.0.0", Platform::Windows, Arch::X86_64)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_latest_document_absolute_urls() {
        let (_dir, _store, service) = service();
        assert!(matches!(
            service.latest_document("https://depot.example.com").await.unwrap_err(),
            Error::NotFound(_)
        ));

        service
            .upload(upload("1.0.0", Platform::Linux, Arch::Aarch64))
            .await
            .unwrap();
        let doc = service.latest_document("https://depot.example.com/").await.unwrap();

        assert_eq!(doc.platforms.len(), 12);
        assert_eq!(
            doc.platforms["linux-aarch64"].url,
            "https://depot.example.com/api/v1/updates/download/1.0.0/linux/aarch64/app.tar.gz"
        );
        assert_eq!(doc.platforms["windows-x86_64"], PlatformEntry::default());
    }

    #[tokio::test]
    async fn test_open_binary_requires_matching_filename() {
        let (_dir, _store, service) = service();
        service
            .upload(upload("1.0.0", Platform::Linux, Arch::I686))
            .await
            .unwrap();

        let (update, stream) = service
            .open_binary("1.0.0", Platform::Linux, Arch::I686, "app.tar.gz")
            .await
            .unwrap();
        let body: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(body.concat().len() as u64, update.file_size);

        let err = service
            .open_binary("1.0.0", Platform::Linux, Arch::I686, "other.tar.gz")
            .await
            .err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
