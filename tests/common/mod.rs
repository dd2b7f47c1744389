// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use depot::catalog::Catalog;
use depot::db::models::Package;
use depot::storage::{DeleteWait, LocalObjectStore, ObjectStore, ObjectStream};
use depot::{Ingestor, UpdateService};
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A catalog and local object store rooted in a temp directory.
///
/// Keep the struct alive for the duration of the test to prevent cleanup.
pub struct TestRegistry {
    pub temp_dir: TempDir,
    pub catalog: Catalog,
    pub store: Arc<LocalObjectStore>,
    pub ingestor: Ingestor,
    pub updates: UpdateService,
}

/// Create an empty registry
pub fn setup_registry() -> TestRegistry {
    let temp_dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::open(temp_dir.path().join("depot.db")).unwrap();

    let store = Arc::new(
        LocalObjectStore::new(temp_dir.path(), "http://localhost:8080", b"integration-secret")
            .unwrap()
            .with_delete_wait(DeleteWait {
                timeout: Duration::from_secs(2),
                interval: Duration::from_millis(10),
            }),
    );
    let dyn_store: Arc<dyn ObjectStore> = store.clone();

    TestRegistry {
        ingestor: Ingestor::new(catalog.clone(), dyn_store.clone()),
        updates: UpdateService::new(catalog.clone(), dyn_store),
        catalog,
        store,
        temp_dir,
    }
}

/// Create a package with default attributes
pub fn create_package(catalog: &Catalog, name: &str) -> Package {
    let mut package = Package::new(name);
    package.description = format!("{} test package", name);
    catalog.create_package(&mut package).unwrap();
    package
}

/// Drain an object stream into memory
pub async fn read_all(stream: ObjectStream) -> Vec<u8> {
    let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
    chunks.concat()
}
