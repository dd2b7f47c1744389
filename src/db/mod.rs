// src/db/mod.rs

//! SQLite catalog database
//!
//! Connections are cheap and short-lived: every catalog operation opens its
//! own connection, and async callers run it inside `spawn_blocking`.

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a connection waits for a competing writer before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Create the database (and parent directories) if needed and apply migrations
pub fn init(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    configure(&conn)?;
    schema::migrate(&conn)?;
    info!("Catalog database ready at {}", path.display());
    Ok(())
}

/// Open an existing, initialized database
pub fn open(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::Internal(format!(
            "database not found at {} (run `depot init`)",
            path.display()
        )));
    }
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

/// Run `f` inside a write transaction
///
/// The transaction is `IMMEDIATE`: the write lock is taken up front, so two
/// read-modify-write sequences can never interleave. Commits when `f`
/// returns `Ok`, rolls back otherwise.
pub fn transaction<F, T>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}
