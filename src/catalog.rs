// src/catalog.rs

//! Catalog facade over the SQLite metadata store
//!
//! Every operation opens its own connection, so a `Catalog` is cheap to
//! clone and share. Operations block; async callers wrap them in
//! `tokio::task::spawn_blocking`.

use crate::db::{
    self,
    models::{LatestVersionAggregate, Package, PackageFile, UpdateBinary, Version},
};
use crate::error::{Error, Result};
use crate::updates::aggregate::{is_newer, merge_update};
use crate::updates::platform::platform_key;
use crate::updates::{Arch, Platform};
use crate::version::ReleaseVersion;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of recording an uploaded file against a version
#[derive(Debug, Clone)]
pub struct RecordedFile {
    /// The version as stored after the upload
    pub version: Version,
    /// Same-named entries that the upload replaced
    pub replaced: Vec<PackageFile>,
}

/// Metadata catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    db_path: PathBuf,
}

impl Catalog {
    /// Open the catalog at `db_path`, creating and migrating it if needed
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        db::init(&db_path)?;
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<Connection> {
        db::open(&self.db_path)
    }

    // ----- packages -----

    pub fn list_packages(&self) -> Result<Vec<Package>> {
        Package::list_all(&self.conn()?)
    }

    pub fn get_package(&self, name: &str) -> Result<Option<Package>> {
        Package::find_by_name(&self.conn()?, name)
    }

    /// Create a package; a taken name fails with `Error::Conflict`
    pub fn create_package(&self, package: &mut Package) -> Result<()> {
        package.insert(&self.conn()?)?;
        info!("Created package {}", package.name);
        Ok(())
    }

    /// Replace all mutable attributes of an existing package
    pub fn update_package(&self, package: &Package) -> Result<Package> {
        let conn = self.conn()?;
        let mut updated = package.clone();
        updated.replace(&conn)?;
        Package::find_by_name(&conn, &package.name)?
            .ok_or_else(|| Error::NotFound(format!("package '{}'", package.name)))
    }

    // ----- versions and files -----

    pub fn list_versions(&self, package_id: i64) -> Result<Vec<Version>> {
        Version::list_for_package(&self.conn()?, package_id)
    }

    pub fn get_version(&self, package_id: i64, version: &str) -> Result<Option<Version>> {
        Version::find(&self.conn()?, package_id, version)
    }

    /// Create a version together with its files
    pub fn create_version(&self, version: &mut Version) -> Result<()> {
        let mut conn = self.conn()?;
        db::transaction(&mut conn, |tx| version.insert(tx).map(|_| ()))
    }

    pub fn delete_version(&self, package_id: i64, version: &str) -> Result<bool> {
        Version::delete(&self.conn()?, package_id, version)
    }

    /// Append a file to an existing version
    ///
    /// Append-only: a file whose name is already in the list is added again.
    pub fn add_file_to_version(&self, package_id: i64, version: &str, file: &PackageFile) -> Result<()> {
        let conn = self.conn()?;
        let version_id = existing_version_id(&conn, package_id, version)?;
        file.clone().insert(&conn, version_id)?;
        Ok(())
    }

    /// Remove entries named `filename` from a version; returns how many went
    pub fn remove_file_from_version(&self, package_id: i64, version: &str, filename: &str) -> Result<usize> {
        let conn = self.conn()?;
        let version_id = existing_version_id(&conn, package_id, version)?;
        PackageFile::delete_by_name(&conn, version_id, filename)
    }

    /// Number of file records referencing `storage_key`
    pub fn count_file_references(&self, storage_key: &str) -> Result<u64> {
        PackageFile::count_by_storage_key(&self.conn()?, storage_key)
    }

    /// Record an uploaded file in one write transaction
    ///
    /// Creates the version on first upload. Otherwise same-named entries are
    /// replaced by `file`. Non-empty `release_notes` / `requirements`
    /// overwrite the version's current values.
    pub fn record_file(
        &self,
        package_id: i64,
        version: &str,
        file: PackageFile,
        release_notes: Option<String>,
        requirements: Option<Vec<String>>,
    ) -> Result<RecordedFile> {
        let mut conn = self.conn()?;
        db::transaction(&mut conn, |tx| {
            let replaced = match Version::find(tx, package_id, version)? {
                None => {
                    let mut created = Version::new(package_id, version);
                    created.release_notes = release_notes.unwrap_or_default();
                    created.requirements = requirements.unwrap_or_default();
                    created.files.push(file);
                    created.insert(tx)?;
                    debug!("Created version {} with first file", version);
                    Vec::new()
                }
                Some(mut existing) => {
                    let version_id = existing
                        .id
                        .ok_or_else(|| Error::Internal("stored version has no ID".to_string()))?;
                    let replaced: Vec<PackageFile> = existing
                        .files
                        .iter()
                        .filter(|f| f.name == file.name)
                        .cloned()
                        .collect();
                    PackageFile::delete_by_name(tx, version_id, &file.name)?;
                    let mut file = file;
                    file.insert(tx, version_id)?;

                    let mut details_changed = false;
                    if let Some(notes) = release_notes.filter(|n| !n.is_empty()) {
                        existing.release_notes = notes;
                        details_changed = true;
                    }
                    if let Some(reqs) = requirements.filter(|r| !r.is_empty()) {
                        existing.requirements = reqs;
                        details_changed = true;
                    }
                    if details_changed {
                        existing.update_details(tx)?;
                    }
                    replaced
                }
            };

            let version = Version::find(tx, package_id, version)?
                .ok_or_else(|| Error::Internal("version vanished during upload".to_string()))?;
            Ok(RecordedFile { version, replaced })
        })
    }

    // ----- update binaries -----

    /// Find a published update
    pub fn find_update(&self, version: &str, platform: Platform, arch: Arch) -> Result<Option<UpdateBinary>> {
        Ok(UpdateBinary::find(&self.conn()?, version, platform, arch)?.filter(|u| u.published))
    }

    /// Insert an update record without touching the aggregate
    pub fn insert_update(&self, update: &mut UpdateBinary) -> Result<()> {
        update.insert(&self.conn()?)?;
        Ok(())
    }

    /// Claim an update identity before its objects are written
    ///
    /// Inserts the row unpublished; a taken identity, published or still
    /// reserved, fails with `Error::Conflict`.
    pub fn reserve_update(&self, update: &mut UpdateBinary) -> Result<()> {
        // TODO: expire reservations left behind by a process that died mid-upload
        update.published = false;
        update.insert(&self.conn()?)?;
        debug!(
            "Reserved update {} for {}/{}",
            update.version, update.platform, update.arch
        );
        Ok(())
    }

    /// Give up a reservation after a failed upload
    pub fn release_update(&self, update: &UpdateBinary) -> Result<bool> {
        match update.id {
            Some(id) => UpdateBinary::delete_reservation(&self.conn()?, id),
            None => Ok(false),
        }
    }

    /// All updates, platform ascending then newest version first
    pub fn list_updates(&self) -> Result<Vec<UpdateBinary>> {
        UpdateBinary::list_all(&self.conn()?)
    }

    /// Highest version uploaded for a platform/arch pair
    pub fn latest_update_for(&self, platform: Platform, arch: Arch) -> Result<Option<UpdateBinary>> {
        let updates = UpdateBinary::list_for_target(&self.conn()?, platform, arch)?;
        Ok(updates
            .into_iter()
            .max_by_key(|u| ReleaseVersion::parse(&u.version)))
    }

    pub fn delete_update(&self, version: &str, platform: Platform, arch: Arch) -> Result<bool> {
        UpdateBinary::delete(&self.conn()?, version, platform, arch)
    }

    // ----- latest-version aggregate -----

    pub fn get_latest_version_doc(&self) -> Result<Option<LatestVersionAggregate>> {
        LatestVersionAggregate::load(&self.conn()?)
    }

    /// Replace the header and upsert every platform row of `doc`
    pub fn upsert_latest_version_doc(&self, doc: &LatestVersionAggregate) -> Result<()> {
        let mut conn = self.conn()?;
        db::transaction(&mut conn, |tx| doc.save(tx))
    }

    /// Publish a reserved update and merge it into the aggregate atomically
    ///
    /// Runs under `BEGIN IMMEDIATE`, so concurrent publishers serialize on
    /// the write lock. Only the header (when it changes), missing platform
    /// rows and this update's own row are written.
    pub fn publish_update(&self, update: &mut UpdateBinary) -> Result<LatestVersionAggregate> {
        let mut conn = self.conn()?;
        db::transaction(&mut conn, |tx| {
            if !update.mark_published(tx)? {
                return Err(Error::Conflict(format!(
                    "no pending reservation for update {} for {}/{}",
                    update.version, update.platform, update.arch
                )));
            }

            let current = LatestVersionAggregate::load(tx)?;
            let headline_changed = match &current {
                None => true,
                Some(doc) => is_newer(&update.version, &doc.version),
            };
            if !headline_changed
                && let Some(doc) = &current
            {
                info!(
                    "Update {} for {}/{} is not newer than headline {}; headline version kept",
                    update.version, update.platform, update.arch, doc.version
                );
            }

            let existing_keys: Vec<String> = current
                .as_ref()
                .map(|doc| doc.platforms.keys().cloned().collect())
                .unwrap_or_default();
            let header_before = current
                .as_ref()
                .map(|doc| (doc.version.clone(), doc.notes.clone(), doc.pub_date.clone()));
            let merged = merge_update(current, update);

            let header_after = (merged.version.clone(), merged.notes.clone(), merged.pub_date.clone());
            if header_before.as_ref() != Some(&header_after) {
                merged.save_header(tx)?;
            }
            let own_key = platform_key(update.platform, update.arch);
            for (key, entry) in &merged.platforms {
                if *key == own_key || !existing_keys.contains(key) {
                    LatestVersionAggregate::save_platform(tx, key, entry)?;
                }
            }

            Ok(merged)
        })
    }
}

/// Run a blocking catalog closure on the blocking thread pool
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("catalog task failed: {}", e)))?
}

fn existing_version_id(conn: &Connection, package_id: i64, version: &str) -> Result<i64> {
    Version::find(conn, package_id, version)?
        .and_then(|v| v.id)
        .ok_or_else(|| Error::NotFound(format!("version '{}'", version)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::now_rfc3339;
    use tempfile::TempDir;

    fn catalog() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path().join("depot.db")).unwrap();
        (dir, catalog)
    }

    fn file(name: &str, key: &str) -> PackageFile {
        PackageFile {
            id: None,
            name: name.to_string(),
            size: 1,
            hash: "h".to_string(),
            content_type: "application/octet-stream".to_string(),
            storage_key: key.to_string(),
            download_url: format!("/api/v1/download/tool/1.0/{name}"),
            uploaded_at: now_rfc3339(),
        }
    }

    #[test]
    fn test_record_file_creates_then_replaces() {
        let (_dir, catalog) = catalog();
        let mut package = Package::new("tool");
        catalog.create_package(&mut package).unwrap();
        let package_id = package.id.unwrap();

        let first = catalog
            .record_file(package_id, "1.0", file("a.zip", "packages/h1/a.zip"), Some("notes".into()), None)
            .unwrap();
        assert!(first.replaced.is_empty());
        assert_eq!(first.version.release_notes, "notes");

        catalog
            .record_file(package_id, "1.0", file("b.zip", "packages/h2/b.zip"), None, None)
            .unwrap();
        let replaced = catalog
            .record_file(package_id, "1.0", file("a.zip", "packages/h3/a.zip"), None, None)
            .unwrap();

        assert_eq!(replaced.replaced.len(), 1);
        assert_eq!(replaced.replaced[0].storage_key, "packages/h1/a.zip");
        let names: Vec<&str> = replaced.version.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["b.zip", "a.zip"]);
        assert_eq!(replaced.version.release_notes, "notes");
    }

    #[test]
    fn test_add_and_remove_file() {
        let (_dir, catalog) = catalog();
        let mut package = Package::new("tool");
        catalog.create_package(&mut package).unwrap();
        let package_id = package.id.unwrap();
        catalog.create_version(&mut Version::new(package_id, "1.0")).unwrap();

        catalog
            .add_file_to_version(package_id, "1.0", &file("a.zip", "k1"))
            .unwrap();
        catalog
            .add_file_to_version(package_id, "1.0", &file("a.zip", "k1"))
            .unwrap();
        assert_eq!(catalog.count_file_references("k1").unwrap(), 2);

        assert_eq!(catalog.remove_file_from_version(package_id, "1.0", "a.zip").unwrap(), 2);
        assert_eq!(catalog.remove_file_from_version(package_id, "1.0", "a.zip").unwrap(), 0);
        assert!(catalog.get_version(package_id, "1.0").unwrap().is_some());

        let err = catalog
            .add_file_to_version(package_id, "9.9", &file("a.zip", "k1"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_update_package_replaces_attributes() {
        let (_dir, catalog) = catalog();
        let mut package = Package::new("tool");
        package.author = "someone".to_string();
        catalog.create_package(&mut package).unwrap();

        let mut replacement = Package::new("tool");
        replacement.is_official = true;
        let updated = catalog.update_package(&replacement).unwrap();
        assert!(updated.is_official);
        assert_eq!(updated.author, "");
        assert_eq!(updated.id, package.id);
    }

    fn reserve_and_publish(catalog: &Catalog, update: &mut UpdateBinary) -> LatestVersionAggregate {
        catalog.reserve_update(update).unwrap();
        catalog.publish_update(update).unwrap()
    }

    #[test]
    fn test_publish_update_field_scoped() {
        let (_dir, catalog) = catalog();

        let mut first = UpdateBinary::new("1.0.0", Platform::Linux, Arch::X86_64, "a", 1, "sig-a");
        let doc = reserve_and_publish(&catalog, &mut first);
        assert_eq!(doc.platforms.len(), 12);

        let mut older = UpdateBinary::new("0.9.0", Platform::Linux, Arch::X86_64, "b", 1, "sig-b");
        reserve_and_publish(&catalog, &mut older);

        let stored = catalog.get_latest_version_doc().unwrap().unwrap();
        assert_eq!(stored.version, "1.0.0");
        assert_eq!(stored.platforms["linux-x86_64"].signature, "sig-b");
        assert_eq!(stored.platforms.len(), 12);

        let duplicate = catalog
            .reserve_update(&mut UpdateBinary::new("1.0.0", Platform::Linux, Arch::X86_64, "c", 1, "s"))
            .unwrap_err();
        assert!(matches!(duplicate, Error::Conflict(_)));
        // Publishing twice is refused and leaves the aggregate untouched
        assert!(matches!(catalog.publish_update(&mut first).unwrap_err(), Error::Conflict(_)));
        assert_eq!(catalog.get_latest_version_doc().unwrap().unwrap(), stored);
    }

    #[test]
    fn test_equal_version_publish_saves_notes() {
        let (_dir, catalog) = catalog();

        let mut first = UpdateBinary::new("1.0.0", Platform::Linux, Arch::X86_64, "a", 1, "s");
        first.notes = "first".to_string();
        reserve_and_publish(&catalog, &mut first);

        let mut second = UpdateBinary::new("1.0.0", Platform::Darwin, Arch::Aarch64, "b", 1, "s");
        second.notes = "second".to_string();
        reserve_and_publish(&catalog, &mut second);

        let stored = catalog.get_latest_version_doc().unwrap().unwrap();
        assert_eq!(stored.version, "1.0.0");
        assert_eq!(stored.notes, "second");
    }

    #[test]
    fn test_reservation_blocks_identity_until_released() {
        let (_dir, catalog) = catalog();

        let mut pending = UpdateBinary::new("3.0.0", Platform::Darwin, Arch::X86_64, "a.dmg", 1, "s");
        catalog.reserve_update(&mut pending).unwrap();
        assert!(catalog.find_update("3.0.0", Platform::Darwin, Arch::X86_64).unwrap().is_none());
        assert!(catalog.list_updates().unwrap().is_empty());

        let mut racer = UpdateBinary::new("3.0.0", Platform::Darwin, Arch::X86_64, "b.dmg", 2, "t");
        assert!(matches!(catalog.reserve_update(&mut racer).unwrap_err(), Error::Conflict(_)));

        assert!(catalog.release_update(&pending).unwrap());
        catalog.reserve_update(&mut racer).unwrap();
        catalog.publish_update(&mut racer).unwrap();
        let found = catalog.find_update("3.0.0", Platform::Darwin, Arch::X86_64).unwrap().unwrap();
        assert_eq!(found.filename, "b.dmg");
        assert!(!catalog.release_update(&found).unwrap());
    }

    #[test]
    fn test_latest_update_for_uses_version_order() {
        let (_dir, catalog) = catalog();
        for v in ["1.2.0", "1.10.0", "1.9.9"] {
            catalog
                .insert_update(&mut UpdateBinary::new(v, Platform::Windows, Arch::X86_64, "f", 1, "s"))
                .unwrap();
        }
        let latest = catalog
            .latest_update_for(Platform::Windows, Arch::X86_64)
            .unwrap()
            .unwrap();
        assert_eq!(latest.version, "1.10.0");
        assert!(catalog.latest_update_for(Platform::Linux, Arch::X86_64).unwrap().is_none());
    }
}
