//! Tenant repository: the organizations jobs are filed under.
//!
//! Provisioning is an administrative action performed by an external tool;
//! the ingestion core only needs to resolve a tenant id.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;
use crate::jobs::model::format_timestamp;

/// A raw tenant row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantRow {
    pub id: String,
    pub name: String,
    pub tax_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TenantRow {
    /// Builds a new tenant with a generated id.
    pub fn new(name: &str, tax_id: Option<&str>) -> Self {
        let now = format_timestamp(Utc::now());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            tax_id: tax_id.map(|t| t.trim().to_uppercase()),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            tax_id: row.get("tax_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new tenant row.
pub fn insert(conn: &Connection, tenant: &TenantRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO tenants (id, name, tax_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            tenant.id,
            tenant.name,
            tenant.tax_id,
            tenant.created_at,
            tenant.updated_at,
        ],
    )
    .map_err(DatabaseError::from)
    .map_err(|e| match &tenant.tax_id {
        Some(tax_id) if e.is_constraint_violation() => DatabaseError::DuplicateTenant(tax_id.clone()),
        _ => e,
    })?;
    Ok(())
}

/// Finds a tenant by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<TenantRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM tenants WHERE id = ?1",
            params![id],
            TenantRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Returns true if a tenant with this ID exists.
pub fn exists(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM tenants WHERE id = ?1",
        params![id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Updates the metadata fields of a tenant. The id is immutable.
pub fn update_metadata(
    conn: &Connection,
    id: &str,
    name: &str,
    tax_id: Option<&str>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE tenants SET name = ?2, tax_id = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, name, tax_id, format_timestamp(Utc::now())],
    )?;
    Ok(changed > 0)
}
