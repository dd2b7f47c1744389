// src/db/models/package.rs

//! Package model - a named artifact in the registry

use super::{json_list, now_rfc3339, to_json_list};
use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

const COLUMNS: &str = "id, name, description, author, repo_url, company_url, is_system, \
                       is_official, categories, icon, star_rating, created_at, updated_at";

/// A named package; identity is its unique name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Package {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub description: String,
    pub author: String,
    pub repo_url: String,
    pub company_url: String,
    pub is_system: bool,
    pub is_official: bool,
    pub categories: Vec<String>,
    pub icon: String,
    pub star_rating: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            author: String::new(),
            repo_url: String::new(),
            company_url: String::new(),
            is_system: false,
            is_official: false,
            categories: Vec::new(),
            icon: String::new(),
            star_rating: 0,
            created_at: None,
            updated_at: None,
        }
    }

    /// Insert this package; a duplicate name fails with `Error::Conflict`
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO packages (name, description, author, repo_url, company_url, is_system,
                                   is_official, categories, icon, star_rating, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                &self.name,
                &self.description,
                &self.author,
                &self.repo_url,
                &self.company_url,
                self.is_system,
                self.is_official,
                to_json_list(&self.categories),
                &self.icon,
                self.star_rating,
                &now,
            ],
        )
        .map_err(|e| match Error::from(e) {
            Error::Conflict(_) => Error::Conflict(format!("package '{}' already exists", self.name)),
            other => other,
        })?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        self.created_at = Some(now.clone());
        self.updated_at = Some(now);
        Ok(id)
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM packages WHERE name = ?1"))?;
        let package = stmt.query_row([name], Self::from_row).optional()?;
        Ok(package)
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM packages WHERE id = ?1"))?;
        let package = stmt.query_row([id], Self::from_row).optional()?;
        Ok(package)
    }

    /// List all packages ordered by name
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM packages ORDER BY name"))?;
        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    /// Replace every mutable attribute of the package identified by `name`
    ///
    /// Identity (name, id) and `created_at` are preserved.
    pub fn replace(&mut self, conn: &Connection) -> Result<()> {
        let now = now_rfc3339();
        let changed = conn.execute(
            "UPDATE packages SET description = ?1, author = ?2, repo_url = ?3, company_url = ?4,
                                 is_system = ?5, is_official = ?6, categories = ?7, icon = ?8,
                                 star_rating = ?9, updated_at = ?10
             WHERE name = ?11",
            params![
                &self.description,
                &self.author,
                &self.repo_url,
                &self.company_url,
                self.is_system,
                self.is_official,
                to_json_list(&self.categories),
                &self.icon,
                self.star_rating,
                &now,
                &self.name,
            ],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(format!("package '{}'", self.name)));
        }
        self.updated_at = Some(now);
        Ok(())
    }

    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            description: row.get(2)?,
            author: row.get(3)?,
            repo_url: row.get(4)?,
            company_url: row.get(5)?,
            is_system: row.get(6)?,
            is_official: row.get(7)?,
            categories: json_list(row, 8)?,
            icon: row.get(9)?,
            star_rating: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}
