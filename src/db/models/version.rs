// src/db/models/version.rs

//! Version and PackageFile models
//!
//! A version belongs to exactly one package and owns an ordered list of
//! files. File order is insertion order (the `version_files` rowid).

use super::{json_list, now_rfc3339, to_json_list};
use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

/// A file attached to a version
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageFile {
    #[serde(skip)]
    pub id: Option<i64>,
    /// Display filename; unique within one version's list
    pub name: String,
    pub size: u64,
    /// Lowercase hex SHA-256 of the content
    pub hash: String,
    pub content_type: String,
    /// Object store key holding the bytes
    #[serde(skip)]
    pub storage_key: String,
    /// Stable server-relative download path
    pub download_url: String,
    pub uploaded_at: String,
}

impl PackageFile {
    /// Insert this file under `version_id`
    pub fn insert(&mut self, conn: &Connection, version_id: i64) -> Result<i64> {
        conn.execute(
            "INSERT INTO version_files
             (version_id, name, size, hash, content_type, storage_key, download_url, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                version_id,
                &self.name,
                self.size as i64,
                &self.hash,
                &self.content_type,
                &self.storage_key,
                &self.download_url,
                &self.uploaded_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Files of a version in insertion order
    pub fn list_for_version(conn: &Connection, version_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, size, hash, content_type, storage_key, download_url, uploaded_at
             FROM version_files WHERE version_id = ?1 ORDER BY id",
        )?;
        let files = stmt
            .query_map([version_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Remove every entry named `name` from a version, returning how many went
    pub fn delete_by_name(conn: &Connection, version_id: i64, name: &str) -> Result<usize> {
        let removed = conn.execute(
            "DELETE FROM version_files WHERE version_id = ?1 AND name = ?2",
            params![version_id, name],
        )?;
        Ok(removed)
    }

    /// Number of file records pointing at a storage key
    pub fn count_by_storage_key(conn: &Connection, storage_key: &str) -> Result<u64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM version_files WHERE storage_key = ?1",
            [storage_key],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let size: i64 = row.get(2)?;
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            size: size as u64,
            hash: row.get(3)?,
            content_type: row.get(4)?,
            storage_key: row.get(5)?,
            download_url: row.get(6)?,
            uploaded_at: row.get(7)?,
        })
    }
}

/// A released version of a package
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Version {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub package_id: i64,
    pub version: String,
    pub requirements: Vec<String>,
    pub release_notes: String,
    pub files: Vec<PackageFile>,
    pub created_at: Option<String>,
}

impl Version {
    pub fn new(package_id: i64, version: impl Into<String>) -> Self {
        Self {
            id: None,
            package_id,
            version: version.into(),
            requirements: Vec::new(),
            release_notes: String::new(),
            files: Vec::new(),
            created_at: None,
        }
    }

    /// Insert the version row and all of its files
    ///
    /// A duplicate (package, version) pair fails with `Error::Conflict`.
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO versions (package_id, version, requirements, release_notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.package_id,
                &self.version,
                to_json_list(&self.requirements),
                &self.release_notes,
                &now,
            ],
        )
        .map_err(|e| match Error::from(e) {
            Error::Conflict(_) => Error::Conflict(format!("version '{}' already exists", self.version)),
            other => other,
        })?;

        let id = conn.last_insert_rowid();
        for file in &mut self.files {
            file.insert(conn, id)?;
        }
        self.id = Some(id);
        self.created_at = Some(now);
        Ok(id)
    }

    /// Find a version together with its files
    pub fn find(conn: &Connection, package_id: i64, version: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, version, requirements, release_notes, created_at
             FROM versions WHERE package_id = ?1 AND version = ?2",
        )?;
        let found = stmt
            .query_row(params![package_id, version], Self::from_row)
            .optional()?;

        match found {
            Some(mut v) => {
                v.load_files(conn)?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    /// All versions of a package, oldest first, with their files
    pub fn list_for_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, version, requirements, release_notes, created_at
             FROM versions WHERE package_id = ?1 ORDER BY id",
        )?;
        let mut versions = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for v in &mut versions {
            v.load_files(conn)?;
        }
        Ok(versions)
    }

    /// Delete a version and, by cascade, its file records
    pub fn delete(conn: &Connection, package_id: i64, version: &str) -> Result<bool> {
        let removed = conn.execute(
            "DELETE FROM versions WHERE package_id = ?1 AND version = ?2",
            params![package_id, version],
        )?;
        Ok(removed > 0)
    }

    /// Update notes and requirements of an existing version
    pub fn update_details(&self, conn: &Connection) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::Internal("cannot update version without ID".to_string()))?;
        conn.execute(
            "UPDATE versions SET requirements = ?1, release_notes = ?2 WHERE id = ?3",
            params![to_json_list(&self.requirements), &self.release_notes, id],
        )?;
        Ok(())
    }

    /// Look up a file in this version by name
    pub fn file(&self, name: &str) -> Option<&PackageFile> {
        self.files.iter().find(|f| f.name == name)
    }

    fn load_files(&mut self, conn: &Connection) -> Result<()> {
        if let Some(id) = self.id {
            self.files = PackageFile::list_for_version(conn, id)?;
        }
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            version: row.get(2)?,
            requirements: json_list(row, 3)?,
            release_notes: row.get(4)?,
            files: Vec::new(),
            created_at: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Package;
    use crate::db::models::test_support::create_test_db;

    fn file(name: &str, key: &str) -> PackageFile {
        PackageFile {
            id: None,
            name: name.to_string(),
            size: 3,
            hash: "abc".to_string(),
            content_type: "application/octet-stream".to_string(),
            storage_key: key.to_string(),
            download_url: format!("/api/v1/download/tool/1.0.0/{name}"),
            uploaded_at: now_rfc3339(),
        }
    }

    #[test]
    fn test_version_with_files() {
        let (_temp, conn) = create_test_db();
        let package_id = Package::new("tool").insert(&conn).unwrap();

        let mut version = Version::new(package_id, "1.0.0");
        version.requirements = vec!["glibc>=2.31".to_string()];
        version.files = vec![file("a.zip", "packages/h1/a.zip"), file("b.zip", "packages/h2/b.zip")];
        version.insert(&conn).unwrap();

        let found = Version::find(&conn, package_id, "1.0.0").unwrap().unwrap();
        assert_eq!(found.requirements, vec!["glibc>=2.31"]);
        let names: Vec<&str> = found.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.zip", "b.zip"]);
        assert_eq!(found.file("b.zip").unwrap().storage_key, "packages/h2/b.zip");
    }

    #[test]
    fn test_duplicate_version_conflicts() {
        let (_temp, conn) = create_test_db();
        let package_id = Package::new("tool").insert(&conn).unwrap();
        Version::new(package_id, "1.0.0").insert(&conn).unwrap();
        let err = Version::new(package_id, "1.0.0").insert(&conn).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_file_reference_counting() {
        let (_temp, conn) = create_test_db();
        let package_id = Package::new("tool").insert(&conn).unwrap();

        let mut v1 = Version::new(package_id, "1.0.0");
        v1.files = vec![file("a.zip", "packages/same/a.zip")];
        v1.insert(&conn).unwrap();
        let mut v2 = Version::new(package_id, "1.0.1");
        v2.files = vec![file("a.zip", "packages/same/a.zip")];
        let v2_id = v2.insert(&conn).unwrap();

        assert_eq!(PackageFile::count_by_storage_key(&conn, "packages/same/a.zip").unwrap(), 2);
        assert_eq!(PackageFile::delete_by_name(&conn, v2_id, "a.zip").unwrap(), 1);
        assert_eq!(PackageFile::count_by_storage_key(&conn, "packages/same/a.zip").unwrap(), 1);
    }

    #[test]
    fn test_delete_cascades_files() {
        let (_temp, conn) = create_test_db();
        let package_id = Package::new("tool").insert(&conn).unwrap();
        let mut version = Version::new(package_id, "2.0");
        version.files = vec![file("x.bin", "packages/k/x.bin")];
        version.insert(&conn).unwrap();

        assert!(Version::delete(&conn, package_id, "2.0").unwrap());
        assert!(!Version::delete(&conn, package_id, "2.0").unwrap());
        assert_eq!(PackageFile::count_by_storage_key(&conn, "packages/k/x.bin").unwrap(), 0);
    }
}
