//! Storage engine - top-level coordinator
//!
//! Composes the tenant layout, connection registry, shared catalog and the
//! health/repair machinery behind the narrow surface the HTTP layer
//! consumes: lifecycle, execution, metrics, health and repair.

use super::handle::{HandleOptions, TenantHandle};
use super::layout::{sanitize, TenantLayout};
use super::registry::ConnectionRegistry;
use super::StorageConfig;
use crate::catalog::Catalog;
use crate::health::{self, repair};
use crate::{
    dialect, EngineStats, HealthReport, HiveError, QueueMetrics, RepairAction, RepairOutcome,
    Result, TenantRecord, TenantStats,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// HiveDB storage engine
pub struct StorageEngine {
    layout: TenantLayout,
    registry: ConnectionRegistry,
    catalog: Catalog,
}

impl StorageEngine {
    /// Open the engine rooted at the configured data directory.
    pub fn new(config: StorageConfig) -> Result<Self> {
        let layout = TenantLayout::new(&config.data_dir)?;
        let options = HandleOptions::from(&config);
        let catalog = Catalog::open(&layout.catalog_path(), &options)?;
        let registry = ConnectionRegistry::new(layout.clone(), options);

        info!("Storage engine ready at {:?}", config.data_dir);
        Ok(Self {
            layout,
            registry,
            catalog,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a tenant: catalog row now, storage directory lazily on first
    /// acquire.
    pub fn create_tenant(
        &self,
        id: Option<&str>,
        name: &str,
        is_test: bool,
    ) -> Result<TenantRecord> {
        self.catalog.create_tenant(id, name, is_test)
    }

    /// Resolve a tenant to its open handle, opening the store (and applying
    /// the baseline schema) on first access. Unknown tenants are rejected
    /// before any storage is touched.
    pub fn acquire(&self, tenant_id: &str) -> Result<Arc<TenantHandle>> {
        let clean = self.known_tenant(tenant_id)?;
        if let Some(handle) = self.registry.get(&clean) {
            return Ok(handle);
        }
        let handle = self.registry.acquire(&clean)?;
        // Racing first-acquires both land here; the schema is IF NOT EXISTS
        // and serialized through the handle's queue, so this is idempotent.
        handle.apply_schema(dialect::CANONICAL_TENANT_SCHEMA)?;
        Ok(handle)
    }

    /// Forcibly close a tenant's handle (post-repair refresh, deletion).
    pub fn evict(&self, tenant_id: &str) -> bool {
        self.registry.evict(tenant_id)
    }

    /// Delete a tenant: evict its handle, then remove its directory, then
    /// its catalog row. Eviction must come first or the directory removal
    /// can fail on platforms that lock open files.
    pub fn delete_tenant(&self, tenant_id: &str) -> Result<()> {
        let clean = self.known_tenant(tenant_id)?;
        self.registry.evict(&clean);
        self.layout.remove(&clean);
        self.catalog.delete_tenant(&clean)?;
        info!("Deleted tenant {}", clean);
        Ok(())
    }

    /// Tenants recorded in the catalog.
    pub fn list_tenants(&self) -> Result<Vec<TenantRecord>> {
        self.catalog.list_tenants()
    }

    /// Tenants flagged as test fixtures.
    pub fn list_test_tenants(&self) -> Result<Vec<TenantRecord>> {
        self.catalog.list_test_tenants()
    }

    /// Close every handle, catalog included. The engine is unusable
    /// afterwards.
    pub fn shutdown(&self) {
        self.registry.evict_all();
        self.catalog.close();
        info!("Storage engine shut down");
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run a mutating statement through the tenant's write queue. JSON
    /// parameters bind positionally; arrays and objects serialize to JSON
    /// text, matching the dialect's column mapping.
    pub fn execute_write(
        &self,
        tenant_id: &str,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<usize> {
        self.execute_write_with_deadline(tenant_id, sql, params, None)
    }

    /// Same as [`execute_write`](Self::execute_write) with a deadline: if it
    /// elapses while the operation is still queued, the operation is skipped
    /// and resolves with `Timeout`.
    pub fn execute_write_with_deadline(
        &self,
        tenant_id: &str,
        sql: &str,
        params: &[serde_json::Value],
        deadline: Option<Duration>,
    ) -> Result<usize> {
        let handle = self.acquire(tenant_id)?;
        let sql = sql.to_string();
        let values = bind_values(params);
        handle
            .enqueue_write(
                "execute",
                deadline,
                Box::new(move |conn| {
                    Ok(conn.execute(&sql, rusqlite::params_from_iter(values))?)
                }),
            )?
            .wait()
    }

    /// Run a read-only statement on the direct read path; rows come back as
    /// column-name → JSON value maps.
    pub fn read_query(
        &self,
        tenant_id: &str,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let handle = self.acquire(tenant_id)?;
        let values = bind_values(params);
        handle.read(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = stmt.query(rusqlite::params_from_iter(values))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut object = serde_json::Map::new();
                for (i, column) in columns.iter().enumerate() {
                    object.insert(column.clone(), value_to_json(row.get_ref(i)?));
                }
                out.push(object);
            }
            Ok(out)
        })
    }

    // ------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------

    /// Queue metrics for one tenant, or aggregated across the catalog and
    /// every open handle when no tenant is given. A known tenant with no
    /// open handle reports an empty snapshot.
    pub fn queue_metrics(&self, tenant_id: Option<&str>) -> Result<QueueMetrics> {
        match tenant_id {
            Some(id) => {
                let clean = self.known_tenant(id)?;
                Ok(self
                    .registry
                    .get(&clean)
                    .map(|handle| handle.queue_metrics())
                    .unwrap_or_default())
            }
            None => {
                let mut snapshots = vec![self.catalog.handle().queue_metrics()];
                for id in self.registry.open_tenants() {
                    if let Some(handle) = self.registry.get(&id) {
                        snapshots.push(handle.queue_metrics());
                    }
                }
                Ok(QueueMetrics::aggregate(snapshots))
            }
        }
    }

    /// Engine-wide statistics.
    pub fn stats(&self) -> Result<EngineStats> {
        let tenant_count = self.catalog.list_tenants()?.len();
        let mut tenants = Vec::new();
        let mut snapshots = vec![self.catalog.handle().queue_metrics()];

        for id in self.registry.open_tenants() {
            if let Some(handle) = self.registry.get(&id) {
                let queue = handle.queue_metrics();
                snapshots.push(queue.clone());
                tenants.push(TenantStats {
                    id,
                    file_size_bytes: handle.file_size(),
                    idle_secs: handle.idle_secs(),
                    queue,
                });
            }
        }

        Ok(EngineStats {
            tenant_count,
            open_handles: self.registry.len(),
            queue: QueueMetrics::aggregate(snapshots),
            tenants,
        })
    }

    // ------------------------------------------------------------------
    // Health & repair
    // ------------------------------------------------------------------

    /// Health report for one tenant, or the shared catalog when no tenant
    /// is given. Never fails: acquisition errors become unhealthy reports.
    pub fn check_health(&self, tenant_id: Option<&str>) -> HealthReport {
        match tenant_id {
            None => health::check(self.catalog.handle(), dialect::CANONICAL_CATALOG_SCHEMA),
            Some(id) => match self.acquire(id) {
                Ok(handle) => health::check(&handle, dialect::CANONICAL_TENANT_SCHEMA),
                Err(e @ HiveError::Validation(_) | e @ HiveError::TenantNotFound(_)) => {
                    HealthReport::unhealthy(e.to_string())
                }
                Err(e) => HealthReport::unhealthy("connection failed")
                    .with_detail("error", serde_json::json!(e.to_string())),
            },
        }
    }

    /// Health reports for every cataloged tenant. One tenant's failure is
    /// captured in its own report, never propagated.
    pub fn check_all(&self) -> Result<BTreeMap<String, HealthReport>> {
        let mut reports = BTreeMap::new();
        for id in self.catalog.tenant_ids()? {
            reports.insert(id.clone(), self.check_health(Some(&id)));
        }
        Ok(reports)
    }

    /// Auto-repair one tenant, or the shared catalog (plus the
    /// orphan-directory sweep) when no tenant is given.
    pub fn auto_fix(&self, tenant_id: Option<&str>) -> RepairOutcome {
        match tenant_id {
            Some(id) => match self.acquire(id) {
                Ok(handle) => repair::auto_fix(&handle, dialect::CANONICAL_TENANT_SCHEMA),
                Err(e) => RepairOutcome::from_actions(vec![RepairAction::failed(
                    "acquire",
                    e.to_string(),
                )]),
            },
            None => {
                let mut outcome =
                    repair::auto_fix(self.catalog.handle(), dialect::CANONICAL_CATALOG_SCHEMA);
                outcome.actions.push(self.sweep_orphan_directories());
                RepairOutcome::from_actions(outcome.actions)
            }
        }
    }

    /// Remove tenant directories with no catalog row.
    fn sweep_orphan_directories(&self) -> RepairAction {
        let known: std::collections::HashSet<String> = match self.catalog.tenant_ids() {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => return RepairAction::failed("orphanDirectories", e.to_string()),
        };
        let dirs = match self.layout.list_tenant_dirs() {
            Ok(dirs) => dirs,
            Err(e) => return RepairAction::failed("orphanDirectories", e.to_string()),
        };

        let orphans: Vec<String> = dirs.into_iter().filter(|d| !known.contains(d)).collect();
        if orphans.is_empty() {
            return RepairAction::skipped("orphanDirectories", "no orphaned directories");
        }
        for dir in &orphans {
            // A stale handle would keep the store file locked on some
            // platforms; evict before removal.
            self.registry.evict(dir);
            self.layout.remove(dir);
        }
        RepairAction::done(
            "orphanDirectories",
            true,
            format!("removed: {}", orphans.join(", ")),
        )
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Legacy single-file stores still present at the root.
    pub fn legacy_artifacts(&self) -> Result<Vec<PathBuf>> {
        self.layout.legacy_artifacts()
    }

    /// Delete legacy artifacts; returns how many files were removed.
    pub fn clean_legacy(&self) -> Result<usize> {
        self.layout.clean_legacy()
    }

    /// Validate a tenant id and confirm it has a catalog row.
    fn known_tenant(&self, tenant_id: &str) -> Result<String> {
        let clean = sanitize(tenant_id);
        if clean.is_empty() {
            return Err(HiveError::Validation(format!(
                "tenant id {tenant_id:?} contains no usable characters"
            )));
        }
        if self.catalog.get_tenant(&clean)?.is_none() {
            return Err(HiveError::TenantNotFound(clean));
        }
        Ok(clean)
    }
}

/// Convert JSON parameters to engine values. Arrays and objects serialize
/// to JSON text, the same representation the dialect gives their columns.
fn bind_values(params: &[serde_json::Value]) -> Vec<rusqlite::types::Value> {
    use rusqlite::types::Value;
    params
        .iter()
        .map(|p| match p {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Integer(*b as i64),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Real(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        })
        .collect()
}

fn value_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::json!(i),
        ValueRef::Real(f) => serde_json::json!(f),
        ValueRef::Text(t) => serde_json::json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => serde_json::json!(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn engine(tmp: &TempDir) -> StorageEngine {
        StorageEngine::new(StorageConfig {
            data_dir: tmp.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    fn seeded(tmp: &TempDir) -> (StorageEngine, String) {
        let engine = engine(tmp);
        let tenant = engine.create_tenant(None, "Blog", false).unwrap();
        (engine, tenant.id)
    }

    #[test]
    fn test_write_and_read_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let (engine, tenant) = seeded(&tmp);

        let rows = engine
            .execute_write(
                &tenant,
                "INSERT INTO collections (id, name, schema) VALUES (?1, ?2, ?3)",
                &[
                    json!(dialect::generate_id()),
                    json!("posts"),
                    json!({"fields": ["title", "body"]}),
                ],
            )
            .unwrap();
        assert_eq!(rows, 1);

        let result = engine
            .read_query(&tenant, "SELECT name, schema FROM collections", &[])
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["name"], json!("posts"));
        // Semi-structured parameters land as JSON text
        assert_eq!(
            result[0]["schema"],
            json!("{\"fields\":[\"title\",\"body\"]}")
        );
    }

    #[test]
    fn test_unknown_tenant_is_rejected_before_storage() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);

        assert!(matches!(
            engine.acquire("no-such-tenant"),
            Err(HiveError::TenantNotFound(_))
        ));
        assert!(matches!(
            engine.execute_write("no-such-tenant", "SELECT 1", &[]),
            Err(HiveError::TenantNotFound(_))
        ));
        // No directory was created for the unknown tenant
        assert!(!tmp.path().join("no-such-tenant").exists());
    }

    #[test]
    fn test_delete_tenant_removes_handle_directory_and_row() {
        let tmp = TempDir::new().unwrap();
        let (engine, tenant) = seeded(&tmp);

        let handle = engine.acquire(&tenant).unwrap();
        assert!(tmp.path().join(&tenant).is_dir());

        engine.delete_tenant(&tenant).unwrap();
        assert!(!handle.is_open());
        assert!(!tmp.path().join(&tenant).exists());
        assert!(matches!(
            engine.acquire(&tenant),
            Err(HiveError::TenantNotFound(_))
        ));
    }

    #[test]
    fn test_tenant_isolation() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        let a = engine.create_tenant(Some("tenant-a"), "A", false).unwrap();
        let b = engine.create_tenant(Some("tenant-b"), "B", false).unwrap();

        engine
            .execute_write(
                &a.id,
                "INSERT INTO collections (id, name) VALUES ('c1', 'only-in-a')",
                &[],
            )
            .unwrap();

        let rows_b = engine
            .read_query(&b.id, "SELECT COUNT(*) AS n FROM collections", &[])
            .unwrap();
        assert_eq!(rows_b[0]["n"], json!(0));
    }

    #[test]
    fn test_metrics_count_writes_and_errors() {
        let tmp = TempDir::new().unwrap();
        let (engine, tenant) = seeded(&tmp);

        for i in 0..3 {
            engine
                .execute_write(
                    &tenant,
                    "INSERT INTO collections (id, name) VALUES (?1, ?2)",
                    &[json!(format!("c{i}")), json!(format!("name-{i}"))],
                )
                .unwrap();
        }
        // Constraint violation surfaces to the caller as the operation's
        // result without disturbing the queue.
        let dup = engine.execute_write(
            &tenant,
            "INSERT INTO collections (id, name) VALUES ('c0', 'dup')",
            &[],
        );
        assert!(matches!(dup, Err(HiveError::Engine(_))));

        let metrics = engine.queue_metrics(Some(&tenant)).unwrap();
        // apply-schema + 4 executes
        assert_eq!(metrics.total_processed, 5);
        assert_eq!(metrics.total_errors, 1);
        assert_eq!(metrics.queue_size, 0);

        // Aggregated view includes the catalog's queue as well
        let aggregated = engine.queue_metrics(None).unwrap();
        assert!(aggregated.total_processed > metrics.total_processed);
    }

    #[test]
    fn test_metrics_for_unopened_tenant_are_empty() {
        let tmp = TempDir::new().unwrap();
        let (engine, tenant) = seeded(&tmp);

        let metrics = engine.queue_metrics(Some(&tenant)).unwrap();
        assert_eq!(metrics.total_processed, 0);
        assert_eq!(metrics.queue_size, 0);
    }

    #[test]
    fn test_concurrent_first_acquire_single_open() {
        let tmp = TempDir::new().unwrap();
        let (engine, tenant) = seeded(&tmp);
        let engine = Arc::new(engine);

        let callers = 50;
        let barrier = Arc::new(Barrier::new(callers));
        let threads: Vec<_> = (0..callers)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let tenant = tenant.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    engine.acquire(&tenant).unwrap()
                })
            })
            .collect();
        let handles: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], handle));
        }
    }

    #[test]
    fn test_health_and_repair_flow() {
        let tmp = TempDir::new().unwrap();
        let (engine, tenant) = seeded(&tmp);

        // Catalog health with no tenant argument
        let catalog_report = engine.check_health(None);
        assert!(catalog_report.healthy);

        assert!(engine.check_health(Some(&tenant)).healthy);

        // Damage the store, observe, repair, re-observe
        let handle = engine.acquire(&tenant).unwrap();
        handle
            .execute_write(
                "drop",
                Box::new(|conn| {
                    conn.execute_batch("DROP TABLE users")?;
                    Ok(0)
                }),
            )
            .unwrap();
        assert!(!engine.check_health(Some(&tenant)).healthy);

        let outcome = engine.auto_fix(Some(&tenant));
        assert!(outcome.success);
        assert!(engine.check_health(Some(&tenant)).healthy);

        let all = engine.check_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[&tenant].healthy);
    }

    #[test]
    fn test_catalog_repair_sweeps_orphan_directories() {
        let tmp = TempDir::new().unwrap();
        let (engine, tenant) = seeded(&tmp);
        engine.acquire(&tenant).unwrap();

        // A directory nobody catalogued, e.g. left behind by a crashed
        // delete.
        std::fs::create_dir(tmp.path().join("stray-tenant")).unwrap();

        let outcome = engine.auto_fix(None);
        assert!(outcome.success);
        let sweep = outcome
            .actions
            .iter()
            .find(|a| a.step == "orphanDirectories")
            .unwrap();
        assert!(sweep.ran && sweep.changed);
        assert!(!tmp.path().join("stray-tenant").exists());
        // Cataloged tenant directories survive
        assert!(tmp.path().join(&tenant).is_dir());

        let again = engine.auto_fix(None);
        assert!(again.success);
        assert!(again.actions.iter().all(|a| !a.ran));
    }

    #[test]
    fn test_legacy_artifacts_surface_through_engine() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        std::fs::write(tmp.path().join("tenant_old.db"), b"x").unwrap();
        std::fs::write(tmp.path().join("tenant_old.db-wal"), b"x").unwrap();

        assert_eq!(engine.legacy_artifacts().unwrap().len(), 2);
        assert_eq!(engine.clean_legacy().unwrap(), 2);
        assert!(engine.legacy_artifacts().unwrap().is_empty());
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let tmp = TempDir::new().unwrap();
        let (engine, tenant) = seeded(&tmp);
        let handle = engine.acquire(&tenant).unwrap();

        engine.shutdown();
        assert!(!handle.is_open());
    }
}
