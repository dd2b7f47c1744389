// src/db/models/latest.rs

//! Latest-version aggregate - the feed polled by auto-update clients
//!
//! Stored as a singleton header row (`latest_version`, id = 1) plus one row
//! per platform key (`latest_version_platforms`). Platform rows are upserted
//! one by one and never deleted.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::collections::BTreeMap;

/// Download location and signature for one platform key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlatformEntry {
    pub signature: String,
    pub url: String,
}

/// The singleton "latest version" document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LatestVersionAggregate {
    pub version: String,
    pub notes: String,
    /// RFC 3339
    pub pub_date: String,
    /// `"{platform}-{arch}"` → entry
    pub platforms: BTreeMap<String, PlatformEntry>,
}

impl LatestVersionAggregate {
    /// Load the aggregate, or `None` if no aggregation has run yet
    pub fn load(conn: &Connection) -> Result<Option<Self>> {
        let header = conn
            .query_row(
                "SELECT version, notes, pub_date FROM latest_version WHERE id = 1",
                [],
                |row| {
                    Ok(Self {
                        version: row.get(0)?,
                        notes: row.get(1)?,
                        pub_date: row.get(2)?,
                        platforms: BTreeMap::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut doc) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT platform_key, signature, url FROM latest_version_platforms ORDER BY platform_key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                PlatformEntry {
                    signature: row.get(1)?,
                    url: row.get(2)?,
                },
            ))
        })?;
        for row in rows {
            let (key, entry) = row?;
            doc.platforms.insert(key, entry);
        }

        Ok(Some(doc))
    }

    /// Write the header and upsert every platform row held by this document
    ///
    /// Rows for keys absent from `platforms` are left untouched.
    pub fn save(&self, conn: &Connection) -> Result<()> {
        self.save_header(conn)?;
        for (key, entry) in &self.platforms {
            Self::save_platform(conn, key, entry)?;
        }
        Ok(())
    }

    /// Write only the header fields
    pub fn save_header(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO latest_version (id, version, notes, pub_date) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                notes = excluded.notes,
                pub_date = excluded.pub_date",
            params![&self.version, &self.notes, &self.pub_date],
        )?;
        Ok(())
    }

    /// Upsert one platform row
    pub fn save_platform(conn: &Connection, key: &str, entry: &PlatformEntry) -> Result<()> {
        conn.execute(
            "INSERT INTO latest_version_platforms (platform_key, signature, url) VALUES (?1, ?2, ?3)
             ON CONFLICT(platform_key) DO UPDATE SET
                signature = excluded.signature,
                url = excluded.url",
            params![key, &entry.signature, &entry.url],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::test_support::create_test_db;

    #[test]
    fn test_load_empty() {
        let (_temp, conn) = create_test_db();
        assert!(LatestVersionAggregate::load(&conn).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let (_temp, conn) = create_test_db();

        let mut doc = LatestVersionAggregate {
            version: "1.0.0".to_string(),
            notes: "first".to_string(),
            pub_date: "2026-01-01T00:00:00Z".to_string(),
            platforms: BTreeMap::new(),
        };
        doc.platforms.insert(
            "linux-x86_64".to_string(),
            PlatformEntry {
                signature: "sig".to_string(),
                url: "/u".to_string(),
            },
        );
        doc.save(&conn).unwrap();

        let loaded = LatestVersionAggregate::load(&conn).unwrap().unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_save_never_removes_rows() {
        let (_temp, conn) = create_test_db();

        let mut doc = LatestVersionAggregate {
            version: "1.0.0".to_string(),
            ..Default::default()
        };
        doc.platforms.insert("linux-x86_64".to_string(), PlatformEntry::default());
        doc.platforms.insert("darwin-aarch64".to_string(), PlatformEntry::default());
        doc.save(&conn).unwrap();

        doc.platforms.remove("darwin-aarch64");
        doc.save(&conn).unwrap();

        let loaded = LatestVersionAggregate::load(&conn).unwrap().unwrap();
        assert!(loaded.platforms.contains_key("darwin-aarch64"));
    }
}
