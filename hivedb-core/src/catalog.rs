//! Shared tenant catalog
//!
//! One database at the storage root records every tenant. The catalog has
//! its own handle (sentinel tenant id) and goes through the same write
//! queue discipline as tenant stores.

use crate::storage::{sanitize, HandleOptions, TenantHandle};
use crate::{config, dialect, HiveError, Result, TenantRecord};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct Catalog {
    handle: Arc<TenantHandle>,
}

impl Catalog {
    /// Open the catalog database, bootstrapping its schema.
    pub fn open(path: &Path, options: &HandleOptions) -> Result<Self> {
        let handle = TenantHandle::open(config::CATALOG_TENANT_ID, path, options)?;
        handle.apply_schema(dialect::CANONICAL_CATALOG_SCHEMA)?;
        Ok(Self { handle })
    }

    /// The catalog's own handle (health checks, repair, metrics).
    pub fn handle(&self) -> &Arc<TenantHandle> {
        &self.handle
    }

    /// Insert a tenant record. A missing id is generated; a provided id is
    /// sanitized and must survive sanitization and be unused.
    pub fn create_tenant(
        &self,
        id: Option<&str>,
        name: &str,
        is_test: bool,
    ) -> Result<TenantRecord> {
        let id = match id {
            Some(raw) => {
                let clean = sanitize(raw);
                if clean.is_empty() {
                    return Err(HiveError::Validation(format!(
                        "tenant id {raw:?} contains no usable characters"
                    )));
                }
                clean
            }
            None => dialect::generate_id(),
        };
        if name.trim().is_empty() {
            return Err(HiveError::Validation("tenant name is required".into()));
        }
        if self.get_tenant(&id)?.is_some() {
            return Err(HiveError::Validation(format!("tenant {id} already exists")));
        }

        let record = TenantRecord {
            id,
            name: name.to_string(),
            created_at: Utc::now().to_rfc3339(),
            is_test,
        };
        let row = record.clone();
        self.handle.execute_write(
            "create-tenant",
            Box::new(move |conn| {
                conn.execute(
                    "INSERT INTO tenants (id, name, created_at, is_test)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![row.id, row.name, row.created_at, row.is_test as i64],
                )?;
                Ok(1)
            }),
        )?;

        info!("Created tenant {} ({})", record.id, record.name);
        Ok(record)
    }

    /// Look up one tenant.
    pub fn get_tenant(&self, id: &str) -> Result<Option<TenantRecord>> {
        let id = id.to_string();
        self.handle.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, created_at, is_test FROM tenants WHERE id = ?1",
                    [&id],
                    record_from_row,
                )
                .optional()?)
        })
    }

    /// All tenants, oldest first.
    pub fn list_tenants(&self) -> Result<Vec<TenantRecord>> {
        self.handle.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, created_at, is_test FROM tenants ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([], record_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Tenants flagged as test fixtures, for bulk cleanup tooling.
    pub fn list_test_tenants(&self) -> Result<Vec<TenantRecord>> {
        self.handle.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, created_at, is_test FROM tenants
                 WHERE is_test = 1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([], record_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Every known tenant id.
    pub fn tenant_ids(&self) -> Result<Vec<String>> {
        Ok(self.list_tenants()?.into_iter().map(|t| t.id).collect())
    }

    /// Delete a tenant's catalog row. Returns whether a row existed.
    pub fn delete_tenant(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        let rows = self.handle.execute_write(
            "delete-tenant",
            Box::new(move |conn| Ok(conn.execute("DELETE FROM tenants WHERE id = ?1", [&id])?)),
        )?;
        Ok(rows > 0)
    }

    /// Close the catalog handle.
    pub fn close(&self) {
        self.handle.close();
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TenantRecord> {
    Ok(TenantRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        is_test: row.get::<_, i64>(3)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use tempfile::TempDir;

    fn open_catalog(tmp: &TempDir) -> Catalog {
        let options = HandleOptions::from(&StorageConfig::default());
        Catalog::open(&tmp.path().join(config::CATALOG_FILE), &options).unwrap()
    }

    #[test]
    fn test_create_get_list_delete() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp);

        let created = catalog.create_tenant(None, "Blog", false).unwrap();
        assert!(!created.id.is_empty());

        let fetched = catalog.get_tenant(&created.id).unwrap().unwrap();
        assert_eq!(fetched, created);

        catalog
            .create_tenant(Some("fixture-1"), "Fixture", true)
            .unwrap();
        assert_eq!(catalog.list_tenants().unwrap().len(), 2);

        let test_only = catalog.list_test_tenants().unwrap();
        assert_eq!(test_only.len(), 1);
        assert_eq!(test_only[0].id, "fixture-1");

        assert!(catalog.delete_tenant(&created.id).unwrap());
        assert!(!catalog.delete_tenant(&created.id).unwrap());
        assert!(catalog.get_tenant(&created.id).unwrap().is_none());
    }

    #[test]
    fn test_create_validates_input() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp);

        assert!(matches!(
            catalog.create_tenant(Some("!!!"), "Bad Id", false),
            Err(HiveError::Validation(_))
        ));
        assert!(matches!(
            catalog.create_tenant(None, "  ", false),
            Err(HiveError::Validation(_))
        ));

        catalog.create_tenant(Some("taken"), "First", false).unwrap();
        assert!(matches!(
            catalog.create_tenant(Some("taken"), "Second", false),
            Err(HiveError::Validation(_))
        ));
    }

    #[test]
    fn test_provided_id_is_sanitized() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp);

        let record = catalog
            .create_tenant(Some("My Project!!"), "My Project", false)
            .unwrap();
        assert_eq!(record.id, "MyProject");
    }
}
