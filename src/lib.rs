// src/lib.rs

//! Depot - private artifact registry
//!
//! Catalogs named packages, their versions and the files attached to each
//! version, backed by content-addressed object storage. Also tracks
//! application self-update binaries per platform/architecture and keeps a
//! single "latest version" feed for auto-update clients.
//!
//! # Architecture
//!
//! - `storage`: object store capability trait with S3 and local backends
//! - `db` / `catalog`: SQLite metadata catalog with enforced identities
//! - `ingest`: hashing, key derivation and catalog recording of uploads
//! - `updates`: update binaries and the latest-version aggregation
//! - `server`: HTTP surface, authorization gate and download rate limiting

pub mod catalog;
pub mod db;
mod error;
pub mod hash;
pub mod ingest;
pub mod storage;
pub mod updates;
pub mod version;

#[cfg(feature = "server")]
pub mod server;

pub use catalog::Catalog;
pub use error::{Error, Result};
pub use hash::ContentDigest;
pub use ingest::{Ingestor, UploadedFile};
pub use storage::{LocalObjectStore, ObjectStore, S3ObjectStore, StorageError};
pub use updates::{Arch, Platform, UpdateService, UpdateUpload};
pub use version::ReleaseVersion;
