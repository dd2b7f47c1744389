// src/db/schema.rs

//! Database schema definitions and migrations for the catalog
//!
//! Identity rules live in the schema itself: unique indexes on package name,
//! (package, version) and (version, platform, arch) make racing creators
//! fail with a constraint violation instead of producing duplicates.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying catalog migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::Internal(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
///
/// - packages: named artifacts and their descriptive metadata
/// - versions / version_files: released versions and their attached files
/// - updates: self-update binaries per (version, platform, arch)
/// - latest_version / latest_version_platforms: the aggregate feed
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT '',
            repo_url TEXT NOT NULL DEFAULT '',
            company_url TEXT NOT NULL DEFAULT '',
            is_system INTEGER NOT NULL DEFAULT 0,
            is_official INTEGER NOT NULL DEFAULT 0,
            categories TEXT NOT NULL DEFAULT '[]',
            icon TEXT NOT NULL DEFAULT '',
            star_rating INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE UNIQUE INDEX idx_packages_name ON packages(name);

        CREATE TABLE versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            version TEXT NOT NULL,
            requirements TEXT NOT NULL DEFAULT '[]',
            release_notes TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX idx_versions_identity ON versions(package_id, version);

        -- Files keep insertion order through their rowid
        CREATE TABLE version_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            size INTEGER NOT NULL,
            hash TEXT NOT NULL,
            content_type TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            download_url TEXT NOT NULL,
            uploaded_at TEXT NOT NULL,
            FOREIGN KEY (version_id) REFERENCES versions(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_version_files_version ON version_files(version_id);
        CREATE INDEX idx_version_files_storage_key ON version_files(storage_key);

        CREATE TABLE updates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version TEXT NOT NULL,
            platform TEXT NOT NULL,
            arch TEXT NOT NULL,
            filename TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            signature TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            release_date TEXT NOT NULL,
            download_url TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX idx_updates_identity ON updates(version, platform, arch);
        CREATE INDEX idx_updates_platform ON updates(platform, arch);

        -- Singleton aggregate header
        CREATE TABLE latest_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            pub_date TEXT NOT NULL
        );

        -- One row per platform-arch key; rows are never deleted
        CREATE TABLE latest_version_platforms (
            platform_key TEXT PRIMARY KEY,
            signature TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL DEFAULT ''
        );
        ",
    )?;

    info!("Catalog schema version 1 created");
    Ok(())
}

/// Version 2 - update reservations
///
/// An upload inserts its row unpublished before writing any object, so the
/// unique identity index decides the winner of a same-identity race before
/// bytes reach the store. Rows from version 1 were all published.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        ALTER TABLE updates ADD COLUMN published INTEGER NOT NULL DEFAULT 1;
        ",
    )?;

    info!("Catalog schema version 2 applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_migrate_creates_all_tables() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "packages",
            "versions",
            "version_files",
            "updates",
            "latest_version",
            "latest_version_platforms",
            "schema_version",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let (_temp, conn) = create_test_db();

        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_version_identity_is_unique() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        conn.execute("INSERT INTO packages (name) VALUES ('tool')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO versions (package_id, version) VALUES (1, '1.0.0')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO versions (package_id, version) VALUES (1, '1.0.0')",
            [],
        );
        assert!(matches!(Error::from(result.unwrap_err()), Error::Conflict(_)));
    }

    #[test]
    fn test_v1_updates_stay_published() {
        let (_temp, conn) = create_test_db();
        init_schema_version(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();
        conn.execute(
            "INSERT INTO updates (version, platform, arch, filename, file_size, signature,
                                  release_date, download_url, created_at, updated_at)
             VALUES ('1.0.0', 'linux', 'x86_64', 'a', 1, 's', 'now', 'u', 'now', 'now')",
            [],
        )
        .unwrap();

        migrate(&conn).unwrap();

        let published: bool = conn
            .query_row("SELECT published FROM updates", [], |row| row.get(0))
            .unwrap();
        assert!(published);
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_latest_version_is_singleton() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO latest_version (id, version, pub_date) VALUES (2, '1.0', 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_files_require_version() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO version_files
             (version_id, name, size, hash, content_type, storage_key, download_url, uploaded_at)
             VALUES (999, 'a', 1, 'h', 't', 'k', 'u', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
