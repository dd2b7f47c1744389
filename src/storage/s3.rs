// src/storage/s3.rs

//! S3-compatible object store (AWS S3, Cloudflare R2, MinIO)

use super::{
    DeleteWait, ObjectStore, ObjectStream, StorageError, StorageResult, validate_key,
    wait_until_absent,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use ::s3::creds::Credentials;
use ::s3::error::S3Error;
use ::s3::{Bucket, Region};
use std::io;
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for R2/MinIO; `None` means AWS for `region`
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Path-style addressing (`endpoint/bucket/key`), needed by most
    /// non-AWS services
    pub path_style: bool,
}

/// Object store backed by an S3 bucket
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
    delete_wait: DeleteWait,
}

impl S3ObjectStore {
    /// Build the client and verify the bucket is reachable
    pub async fn connect(config: &S3Config) -> StorageResult<Self> {
        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .region
                .parse()
                .map_err(|e| StorageError::Unavailable(format!("invalid region: {}", e)))?,
        };

        let credentials = Credentials::new(
            Some(&config.access_key_id),
            Some(&config.secret_access_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::PermissionDenied(format!("invalid credentials: {}", e)))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials).map_err(map_s3)?;
        if config.path_style {
            bucket = bucket.with_path_style();
        }

        let store = Self {
            bucket,
            delete_wait: DeleteWait::default(),
        };
        store.verify_access().await?;
        info!("Connected to bucket {}", config.bucket);
        Ok(store)
    }

    pub fn with_delete_wait(mut self, wait: DeleteWait) -> Self {
        self.delete_wait = wait;
        self
    }
}

/// Map a non-success HTTP status to a storage error
fn map_status(key: &str, status: u16) -> StorageError {
    match status {
        404 => StorageError::NotFound(key.to_string()),
        401 | 403 => StorageError::PermissionDenied(format!("{} (HTTP {})", key, status)),
        _ => StorageError::Unavailable(format!("{} (HTTP {})", key, status)),
    }
}

fn map_s3(err: S3Error) -> StorageError {
    match err {
        S3Error::HttpFailWithBody(status, body) => match status {
            404 => StorageError::NotFound(body),
            401 | 403 => StorageError::PermissionDenied(body),
            _ => StorageError::Unavailable(format!("HTTP {}: {}", status, body)),
        },
        other => StorageError::Unavailable(other.to_string()),
    }
}

/// Adapt a response body stream, chunk by chunk, into an `ObjectStream`
fn object_stream<S>(key: &str, body: S) -> ObjectStream
where
    S: Stream<Item = Result<Bytes, S3Error>> + Send + 'static,
{
    let key = key.to_string();
    body.map(move |chunk| chunk.map_err(|e| io::Error::other(format!("{}: {}", key, e))))
        .boxed()
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        let response = self
            .bucket
            .put_object_with_content_type(key, &data, content_type)
            .await
            .map_err(map_s3)?;
        let status = response.status_code();
        if !is_success(status) {
            return Err(map_status(key, status));
        }
        debug!("Uploaded {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<ObjectStream> {
        validate_key(key)?;
        let response = self.bucket.get_object_stream(key).await.map_err(map_s3)?;
        if !is_success(response.status_code) {
            return Err(map_status(key, response.status_code));
        }
        Ok(object_stream(key, response.bytes))
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        validate_key(key)?;
        let (head, status) = self.bucket.head_object(key).await.map_err(map_s3)?;
        if !is_success(status) {
            return Err(map_status(key, status));
        }
        head.content_length
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| StorageError::Unavailable(format!("{}: missing content length", key)))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let response = self.bucket.delete_object(key).await.map_err(map_s3)?;
        let status = response.status_code();
        // S3 answers 204 for missing keys too; 404 from other services is fine
        if !is_success(status) && status != 404 {
            return Err(map_status(key, status));
        }
        wait_until_absent(self, key, self.delete_wait).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match self.bucket.head_object(key).await {
            Ok((_, status)) if is_success(status) => Ok(true),
            Ok((_, 404)) => Ok(false),
            Ok((_, status)) => Err(map_status(key, status)),
            Err(e) => match map_s3(e) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn signed_read_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        validate_key(key)?;
        let secs = u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX);
        self.bucket
            .presign_get(key, secs, None)
            .await
            .map_err(map_s3)
    }

    async fn verify_access(&self) -> StorageResult<()> {
        let (_, status) = self
            .bucket
            .list_page(String::new(), None, None, None, Some(1))
            .await
            .map_err(map_s3)?;
        if !is_success(status) {
            return Err(map_status(&self.bucket.name(), status));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_object_stream_passes_chunks_through() {
        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"first ")),
            Ok(Bytes::from_static(b"second")),
            Err(S3Error::HttpFailWithBody(500, "reset".to_string())),
        ]);
        let chunks: Vec<io::Result<Bytes>> = object_stream("packages/h/a.bin", body).collect().await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].as_ref().unwrap(), &Bytes::from_static(b"first "));
        assert_eq!(chunks[1].as_ref().unwrap(), &Bytes::from_static(b"second"));
        let err = chunks[2].as_ref().unwrap_err();
        assert!(err.to_string().contains("packages/h/a.bin"));
    }

    #[test]
    fn test_status_mapping() {
        assert!(map_status("k", 404).is_not_found());
        assert!(matches!(map_status("k", 403), StorageError::PermissionDenied(_)));
        assert!(matches!(map_status("k", 401), StorageError::PermissionDenied(_)));
        assert!(matches!(map_status("k", 503), StorageError::Unavailable(_)));
    }

    #[test]
    fn test_s3_error_mapping() {
        let err = map_s3(S3Error::HttpFailWithBody(404, "NoSuchKey".to_string()));
        assert!(err.is_not_found());
        let err = map_s3(S3Error::HttpFailWithBody(500, "oops".to_string()));
        assert!(matches!(err, StorageError::Unavailable(_)));
    }
}
