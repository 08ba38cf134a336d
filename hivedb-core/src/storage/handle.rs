//! Tenant handle - one open session to a tenant's (or the catalog's) store
//!
//! The handle is the unit of mutual exclusion: it owns the single engine
//! connection for its store, shares it between the write-queue worker and
//! the direct read path, and releases it deterministically on close so the
//! store file can be deleted afterwards.

use super::StorageConfig;
use crate::queue::{SharedConnection, WriteOp, WriteQueue, WriteTicket};
use crate::{dialect, HiveError, QueueMetrics, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Per-handle knobs derived from [`StorageConfig`].
#[derive(Debug, Clone)]
pub struct HandleOptions {
    pub max_queue_depth: Option<usize>,
    pub serialize_reads: bool,
    pub busy_timeout_ms: u64,
}

impl From<&StorageConfig> for HandleOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_queue_depth: config.max_queue_depth,
            serialize_reads: config.serialize_reads,
            busy_timeout_ms: config.busy_timeout_ms,
        }
    }
}

/// An open connection to one store, with its write queue.
pub struct TenantHandle {
    tenant_id: String,
    path: PathBuf,
    conn: SharedConnection,
    queue: WriteQueue,
    serialize_reads: bool,
    last_used: Mutex<Instant>,
}

impl TenantHandle {
    /// Open (creating if absent) the store at `path` and start its writer.
    pub fn open(tenant_id: &str, path: &Path, options: &HandleOptions) -> Result<Arc<Self>> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch(
            "PRAGMA journal_mode = wal;
             PRAGMA synchronous = normal;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;

        let conn: SharedConnection = Arc::new(Mutex::new(Some(conn)));
        let queue = WriteQueue::start(tenant_id, Arc::clone(&conn), options.max_queue_depth)?;

        info!("Opened store for {} at {:?}", tenant_id, path);
        Ok(Arc::new(Self {
            tenant_id: tenant_id.to_string(),
            path: path.to_path_buf(),
            conn,
            queue,
            serialize_reads: options.serialize_reads,
            last_used: Mutex::new(Instant::now()),
        }))
    }

    /// Tenant this handle belongs to (the catalog sentinel for the shared
    /// catalog).
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the connection is still open.
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Seconds since this handle last served an operation.
    pub fn idle_secs(&self) -> u64 {
        self.last_used.lock().elapsed().as_secs()
    }

    /// On-disk size of the store file, zero if unreadable.
    pub fn file_size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Run a read-only closure against the connection.
    ///
    /// By default this takes the connection lock directly, interleaving with
    /// the writer at lock granularity. With `serialize_reads` the read first
    /// drains the queue through a barrier operation, giving it a FIFO
    /// position after every previously enqueued write.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.touch();
        if self.serialize_reads {
            self.queue.execute("read-barrier", Box::new(|_| Ok(0)))?;
        }
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| HiveError::HandleClosed(self.tenant_id.clone()))?;
        f(conn)
    }

    /// Enqueue a mutating operation, optionally with a deadline that is
    /// checked before execution starts.
    pub fn enqueue_write(
        &self,
        label: &str,
        deadline: Option<Duration>,
        op: WriteOp,
    ) -> Result<WriteTicket> {
        self.touch();
        self.queue.enqueue(label, deadline, op)
    }

    /// Enqueue a mutating operation and block until it resolves.
    pub fn execute_write(&self, label: &str, op: WriteOp) -> Result<usize> {
        self.enqueue_write(label, None, op)?.wait()
    }

    /// Translate and apply a canonical schema through the write queue.
    /// Idempotent: every statement is `IF NOT EXISTS`.
    pub fn apply_schema(&self, canonical: &str) -> Result<usize> {
        let ddl = dialect::translate(canonical);
        self.execute_write(
            "apply-schema",
            Box::new(move |conn| {
                conn.execute_batch(&ddl)?;
                Ok(0)
            }),
        )
    }

    /// Queue metrics for this handle.
    pub fn queue_metrics(&self) -> QueueMetrics {
        self.queue.metrics()
    }

    /// Drain the queue, stop the worker and release the connection.
    ///
    /// Must run before the store file is deleted; some platforms refuse to
    /// remove files with open handles.
    pub fn close(&self) {
        self.queue.shutdown();
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            if let Err((_, e)) = conn.close() {
                warn!("error closing store for {}: {}", self.tenant_id, e);
            }
        }
        info!("Closed store for {}", self.tenant_id);
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_handle(tmp: &TempDir) -> Arc<TenantHandle> {
        let options = HandleOptions::from(&StorageConfig::default());
        TenantHandle::open("tenant-a", &tmp.path().join("tenant.db"), &options).unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let handle = open_handle(&tmp);
        handle.apply_schema(dialect::CANONICAL_TENANT_SCHEMA).unwrap();

        let rows = handle
            .execute_write(
                "insert",
                Box::new(|conn| {
                    conn.execute(
                        "INSERT INTO collections (id, name) VALUES (?1, ?2)",
                        ["c1", "posts"],
                    )?;
                    Ok(1)
                }),
            )
            .unwrap();
        assert_eq!(rows, 1);

        let name: String = handle
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT name FROM collections WHERE id = 'c1'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(name, "posts");
    }

    #[test]
    fn test_apply_schema_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let handle = open_handle(&tmp);
        handle.apply_schema(dialect::CANONICAL_TENANT_SCHEMA).unwrap();
        handle.apply_schema(dialect::CANONICAL_TENANT_SCHEMA).unwrap();
    }

    #[test]
    fn test_close_releases_connection() {
        let tmp = TempDir::new().unwrap();
        let handle = open_handle(&tmp);
        handle.apply_schema(dialect::CANONICAL_TENANT_SCHEMA).unwrap();

        handle.close();
        assert!(!handle.is_open());
        assert!(matches!(
            handle.read(|_| Ok(())),
            Err(HiveError::HandleClosed(_))
        ));
        assert!(matches!(
            handle.execute_write("late", Box::new(|_| Ok(0))),
            Err(HiveError::HandleClosed(_))
        ));

        // File is removable once the handle is closed.
        std::fs::remove_file(tmp.path().join("tenant.db")).unwrap();
    }

    #[test]
    fn test_serialized_reads_observe_queued_writes() {
        let tmp = TempDir::new().unwrap();
        let options = HandleOptions {
            serialize_reads: true,
            ..HandleOptions::from(&StorageConfig::default())
        };
        let handle =
            TenantHandle::open("tenant-a", &tmp.path().join("tenant.db"), &options).unwrap();
        handle.apply_schema(dialect::CANONICAL_TENANT_SCHEMA).unwrap();

        // Enqueue without waiting, then read: the barrier must place the
        // read after the pending insert.
        let ticket = handle
            .enqueue_write(
                "insert",
                None,
                Box::new(|conn| {
                    std::thread::sleep(Duration::from_millis(50));
                    conn.execute(
                        "INSERT INTO collections (id, name) VALUES ('c1', 'posts')",
                        [],
                    )?;
                    Ok(1)
                }),
            )
            .unwrap();

        let count: i64 = handle
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM collections", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
        ticket.wait().unwrap();
    }
}
