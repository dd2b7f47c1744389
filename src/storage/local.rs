// src/storage/local.rs

//! Filesystem object store
//!
//! Objects live under `{root}/objects/{key}`. Writes go to a sibling temp
//! file first and are renamed into place, so a reader never observes a
//! partially written object.
//!
//! Signed URLs point back at this server (`/api/v1/objects/{key}`) and carry
//! an expiry timestamp plus an HMAC-SHA256 over the key and expiry.

use super::{
    DeleteWait, ObjectStore, ObjectStream, StorageError, StorageResult, validate_key,
    wait_until_absent,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Signed URL verification failures
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignedUrlError {
    #[error("signed URL has expired")]
    Expired,
    #[error("signed URL signature is invalid")]
    BadSignature,
    #[error("signed URL key is invalid")]
    InvalidKey,
}

/// Object store backed by a local directory
pub struct LocalObjectStore {
    objects_dir: PathBuf,
    public_base: Url,
    signing_secret: Vec<u8>,
    delete_wait: DeleteWait,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`
    ///
    /// `public_base` is the externally visible server URL used when building
    /// signed URLs, e.g. `https://depot.example.com`.
    pub fn new(root: impl AsRef<Path>, public_base: &str, signing_secret: &[u8]) -> StorageResult<Self> {
        if signing_secret.is_empty() {
            return Err(StorageError::Unavailable(
                "local store requires a non-empty signing secret".to_string(),
            ));
        }
        let public_base = Url::parse(public_base).map_err(|e| {
            StorageError::Unavailable(format!("invalid public base URL '{}': {}", public_base, e))
        })?;
        if public_base.cannot_be_a_base() {
            return Err(StorageError::Unavailable(format!(
                "public base URL '{}' cannot be a base",
                public_base
            )));
        }

        Ok(Self {
            objects_dir: root.as_ref().join("objects"),
            public_base,
            signing_secret: signing_secret.to_vec(),
            delete_wait: DeleteWait::default(),
        })
    }

    pub fn with_delete_wait(mut self, wait: DeleteWait) -> Self {
        self.delete_wait = wait;
        self
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        let mut path = self.objects_dir.clone();
        path.extend(key.split('/'));
        Ok(path)
    }

    fn signature(&self, key: &str, expires: i64) -> StorageResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_secret)
            .map_err(|e| StorageError::Unavailable(format!("signing key rejected: {}", e)))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Check a signed URL's key, expiry and signature against `now` (unix seconds)
    pub fn verify_signed(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> Result<(), SignedUrlError> {
        validate_key(key).map_err(|_| SignedUrlError::InvalidKey)?;
        if now > expires {
            return Err(SignedUrlError::Expired);
        }
        let provided = hex::decode(signature).map_err(|_| SignedUrlError::BadSignature)?;
        self.signature(key, expires)
            .map_err(|_| SignedUrlError::BadSignature)?
            .verify_slice(&provided)
            .map_err(|_| SignedUrlError::BadSignature)
    }

    /// Build a signed URL that expires at `expires` (unix seconds)
    pub fn signed_url_at(&self, key: &str, expires: i64) -> StorageResult<String> {
        validate_key(key)?;
        let signature = hex::encode(self.signature(key, expires)?.finalize().into_bytes());

        let mut url = self.public_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::InvalidKey(key.to_string()))?;
            segments.pop_if_empty().extend(["api", "v1", "objects"]);
            segments.extend(key.split('/'));
        }
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);
        Ok(url.into())
    }
}

fn map_io(key: &str, err: io::Error) -> StorageError {
    match err.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
        io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(format!("{}: {}", key, err)),
        _ => StorageError::Unavailable(format!("{}: {}", key, err)),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(key, e))?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(format!(
            ".tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let tmp_path = PathBuf::from(tmp_name);

        let write = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp_path, &path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(map_io(key, e));
        }

        debug!("Stored {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<ObjectStream> {
        let path = self.object_path(key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_io(key, e))?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        let path = self.object_path(key)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_io(key, e))?;
        Ok(meta.len())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(map_io(key, e)),
        }
        wait_until_absent(self, key, self.delete_wait).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| map_io(key, e))
    }

    async fn signed_read_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        self.signed_url_at(key, expires)
    }

    async fn verify_access(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.objects_dir)
            .await
            .map_err(|e| map_io(&self.objects_dir.display().to_string(), e))?;
        let meta = tokio::fs::metadata(&self.objects_dir)
            .await
            .map_err(|e| map_io(&self.objects_dir.display().to_string(), e))?;
        if meta.permissions().readonly() {
            return Err(StorageError::PermissionDenied(format!(
                "{} is read-only",
                self.objects_dir.display()
            )));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
