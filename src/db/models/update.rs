// src/db/models/update.rs

//! UpdateBinary model - a self-update build for one platform/arch

use super::{now_rfc3339, parse_column};
use crate::error::{Error, Result};
use crate::storage;
use crate::updates::{Arch, Platform};
use crate::version::ReleaseVersion;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

const COLUMNS: &str = "id, version, platform, arch, filename, file_size, signature, notes, \
                       release_date, download_url, created_at, updated_at, published";

/// An update binary; identity is (version, platform, arch)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateBinary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Version without a leading `v`
    pub version: String,
    pub platform: Platform,
    pub arch: Arch,
    pub filename: String,
    pub file_size: u64,
    /// Verbatim text of the detached signature
    pub signature: String,
    pub notes: String,
    pub release_date: String,
    /// Stable server-relative download path
    pub download_url: String,
    pub created_at: String,
    pub updated_at: String,
    /// Unpublished rows are reservations held while an upload writes its
    /// objects; listings skip them
    #[serde(skip)]
    pub published: bool,
}

impl UpdateBinary {
    pub fn new(
        version: impl Into<String>,
        platform: Platform,
        arch: Arch,
        filename: impl Into<String>,
        file_size: u64,
        signature: impl Into<String>,
    ) -> Self {
        let version = version.into();
        let filename = filename.into();
        let now = now_rfc3339();
        let download_url = format!(
            "/api/v1/updates/download/{}/{}/{}/{}",
            version, platform, arch, filename
        );
        Self {
            id: None,
            version,
            platform,
            arch,
            filename,
            file_size,
            signature: signature.into(),
            notes: String::new(),
            release_date: now.clone(),
            download_url,
            created_at: now.clone(),
            updated_at: now,
            published: true,
        }
    }

    /// Object store key of the binary
    pub fn storage_key(&self) -> String {
        storage::update_binary_key(
            &self.version,
            self.platform.as_str(),
            self.arch.as_str(),
            &self.filename,
        )
    }

    /// Object store key of the detached signature
    pub fn signature_key(&self) -> String {
        storage::update_signature_key(&self.storage_key())
    }

    /// Insert this update; an existing identity fails with `Error::Conflict`
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO updates (version, platform, arch, filename, file_size, signature, notes,
                                  release_date, download_url, created_at, updated_at, published)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                &self.version,
                self.platform.as_str(),
                self.arch.as_str(),
                &self.filename,
                self.file_size as i64,
                &self.signature,
                &self.notes,
                &self.release_date,
                &self.download_url,
                &self.created_at,
                &self.updated_at,
                self.published,
            ],
        )
        .map_err(|e| match Error::from(e) {
            Error::Conflict(_) => Error::Conflict(format!(
                "update {} for {}/{} already exists",
                self.version, self.platform, self.arch
            )),
            other => other,
        })?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find by identity, reservations included
    pub fn find(conn: &Connection, version: &str, platform: Platform, arch: Arch) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM updates WHERE version = ?1 AND platform = ?2 AND arch = ?3"
        ))?;
        let update = stmt
            .query_row(params![version, platform.as_str(), arch.as_str()], Self::from_row)
            .optional()?;
        Ok(update)
    }

    /// All updates, platform ascending then newest version first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM updates WHERE published = 1"))?;
        let mut updates = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        updates.sort_by(|a, b| {
            a.platform
                .as_str()
                .cmp(b.platform.as_str())
                .then_with(|| ReleaseVersion::parse(&b.version).cmp(&ReleaseVersion::parse(&a.version)))
                .then_with(|| a.arch.as_str().cmp(b.arch.as_str()))
        });
        Ok(updates)
    }

    /// Updates for one platform/arch pair
    pub fn list_for_target(conn: &Connection, platform: Platform, arch: Arch) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM updates WHERE platform = ?1 AND arch = ?2 AND published = 1"
        ))?;
        let updates = stmt
            .query_map(params![platform.as_str(), arch.as_str()], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(updates)
    }

    /// Delete an update record; returns whether a row was removed
    pub fn delete(conn: &Connection, version: &str, platform: Platform, arch: Arch) -> Result<bool> {
        let removed = conn.execute(
            "DELETE FROM updates WHERE version = ?1 AND platform = ?2 AND arch = ?3",
            params![version, platform.as_str(), arch.as_str()],
        )?;
        Ok(removed > 0)
    }

    /// Turn a reservation into a published record
    ///
    /// Returns false when the reservation no longer exists.
    pub fn mark_published(&mut self, conn: &Connection) -> Result<bool> {
        let id = self
            .id
            .ok_or_else(|| Error::Internal("update reservation has no ID".to_string()))?;
        self.updated_at = now_rfc3339();
        let changed = conn.execute(
            "UPDATE updates SET published = 1, updated_at = ?2 WHERE id = ?1 AND published = 0",
            params![id, &self.updated_at],
        )?;
        if changed > 0 {
            self.published = true;
        }
        Ok(changed > 0)
    }

    /// Drop an unpublished reservation by ID; published rows are kept
    pub fn delete_reservation(conn: &Connection, id: i64) -> Result<bool> {
        let removed = conn.execute(
            "DELETE FROM updates WHERE id = ?1 AND published = 0",
            params![id],
        )?;
        Ok(removed > 0)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let file_size: i64 = row.get(5)?;
        Ok(Self {
            id: Some(row.get(0)?),
            version: row.get(1)?,
            platform: parse_column(row, 2)?,
            arch: parse_column(row, 3)?,
            filename: row.get(4)?,
            file_size: file_size as u64,
            signature: row.get(6)?,
            notes: row.get(7)?,
            release_date: row.get(8)?,
            download_url: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            published: row.get(12)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::test_support::create_test_db;

    #[test]
    fn test_update_crud() {
        let (_temp, conn) = create_test_db();

        let mut update = UpdateBinary::new("1.0.0", Platform::Linux, Arch::X86_64, "app.tar.gz", 10, "sig");
        update.insert(&conn).unwrap();
        assert_eq!(
            update.download_url,
            "/api/v1/updates/download/1.0.0/linux/x86_64/app.tar.gz"
        );
        assert_eq!(update.signature_key(), "updates/1.0.0/linux/x86_64/app.tar.gz.sig");

        let found = UpdateBinary::find(&conn, "1.0.0", Platform::Linux, Arch::X86_64)
            .unwrap()
            .unwrap();
        assert_eq!(found.platform, Platform::Linux);
        assert_eq!(found.signature, "sig");

        assert!(UpdateBinary::delete(&conn, "1.0.0", Platform::Linux, Arch::X86_64).unwrap());
        assert!(UpdateBinary::find(&conn, "1.0.0", Platform::Linux, Arch::X86_64)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_duplicate_identity_conflicts() {
        let (_temp, conn) = create_test_db();
        UpdateBinary::new("1.0.0", Platform::Darwin, Arch::Aarch64, "a.dmg", 1, "s")
            .insert(&conn)
            .unwrap();
        let err = UpdateBinary::new("1.0.0", Platform::Darwin, Arch::Aarch64, "b.dmg", 1, "s")
            .insert(&conn)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_reservation_hidden_until_published() {
        let (_temp, conn) = create_test_db();
        let mut update = UpdateBinary::new("1.0.0", Platform::Linux, Arch::Armv7, "a.tar.gz", 1, "s");
        update.published = false;
        let id = update.insert(&conn).unwrap();

        assert!(UpdateBinary::list_all(&conn).unwrap().is_empty());
        assert!(UpdateBinary::list_for_target(&conn, Platform::Linux, Arch::Armv7).unwrap().is_empty());
        assert!(!UpdateBinary::find(&conn, "1.0.0", Platform::Linux, Arch::Armv7)
            .unwrap()
            .unwrap()
            .published);

        assert!(update.mark_published(&conn).unwrap());
        assert!(!update.mark_published(&conn).unwrap());
        assert_eq!(UpdateBinary::list_all(&conn).unwrap().len(), 1);

        // Published rows are not reservations
        assert!(!UpdateBinary::delete_reservation(&conn, id).unwrap());
    }

    #[test]
    fn test_list_ordering() {
        let (_temp, conn) = create_test_db();
        for (version, platform) in [
            ("1.2.0", Platform::Windows),
            ("1.10.0", Platform::Linux),
            ("1.9.0", Platform::Linux),
            ("2.0.0", Platform::Darwin),
        ] {
            UpdateBinary::new(version, platform, Arch::X86_64, "f", 1, "s")
                .insert(&conn)
                .unwrap();
        }

        let order: Vec<(String, Platform)> = UpdateBinary::list_all(&conn)
            .unwrap()
            .into_iter()
            .map(|u| (u.version, u.platform))
            .collect();
        assert_eq!(
            order,
            [
                ("2.0.0".to_string(), Platform::Darwin),
                ("1.10.0".to_string(), Platform::Linux),
                ("1.9.0".to_string(), Platform::Linux),
                ("1.2.0".to_string(), Platform::Windows),
            ]
        );
    }
}
