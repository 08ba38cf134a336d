//! Connection registry - at most one open handle per tenant
//!
//! Opening a file-backed store is comparatively expensive and tenants are
//! revisited constantly, so handles are cached for the process lifetime and
//! only closed by explicit eviction (tenant deletion, post-repair refresh)
//! or shutdown.

use super::handle::{HandleOptions, TenantHandle};
use super::layout::{sanitize, TenantLayout};
use crate::{HiveError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

pub struct ConnectionRegistry {
    layout: TenantLayout,
    options: HandleOptions,
    handles: RwLock<HashMap<String, Arc<TenantHandle>>>,
    /// Lifetime count of underlying opens; lets tests assert the
    /// one-handle-per-tenant invariant.
    opens: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(layout: TenantLayout, options: HandleOptions) -> Self {
        Self {
            layout,
            options,
            handles: RwLock::new(HashMap::new()),
            opens: AtomicU64::new(0),
        }
    }

    /// Return the open handle for a tenant, opening it on first access.
    ///
    /// Concurrent callers for the same tenant always receive the same handle
    /// instance: the open runs under the map's write lock with a re-check,
    /// so a racing caller finds the first caller's handle instead of opening
    /// a second one.
    pub fn acquire(&self, tenant_id: &str) -> Result<Arc<TenantHandle>> {
        let clean = sanitize(tenant_id);
        if clean.is_empty() {
            return Err(HiveError::Validation(format!(
                "tenant id {tenant_id:?} contains no usable characters"
            )));
        }

        {
            let handles = self.handles.read();
            if let Some(handle) = handles.get(&clean) {
                return Ok(Arc::clone(handle));
            }
        }

        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(&clean) {
            return Ok(Arc::clone(handle));
        }

        let path = self.layout.resolve(&clean)?;
        let handle = TenantHandle::open(&clean, &path, &self.options)?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        handles.insert(clean, Arc::clone(&handle));
        Ok(handle)
    }

    /// The open handle for a tenant, if any. Never opens.
    pub fn get(&self, tenant_id: &str) -> Option<Arc<TenantHandle>> {
        self.handles.read().get(&sanitize(tenant_id)).cloned()
    }

    /// Forcibly close and drop a tenant's handle. Returns whether a handle
    /// was open. Required before deleting the tenant's directory.
    pub fn evict(&self, tenant_id: &str) -> bool {
        let removed = self.handles.write().remove(&sanitize(tenant_id));
        match removed {
            Some(handle) => {
                handle.close();
                info!("Evicted handle for {}", handle.tenant_id());
                true
            }
            None => false,
        }
    }

    /// Close every open handle (process shutdown).
    pub fn evict_all(&self) {
        let drained: Vec<_> = self.handles.write().drain().collect();
        for (_, handle) in drained {
            handle.close();
        }
    }

    /// Tenant ids with an open handle.
    pub fn open_tenants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of handles currently open.
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }

    /// Lifetime count of underlying store opens.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn registry(tmp: &TempDir) -> ConnectionRegistry {
        let layout = TenantLayout::new(tmp.path()).unwrap();
        ConnectionRegistry::new(layout, HandleOptions::from(&StorageConfig::default()))
    }

    #[test]
    fn test_acquire_caches_handle() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);

        let a = registry.acquire("tenant-a").unwrap();
        let b = registry.acquire("tenant-a").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.open_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_acquire_opens_exactly_once() {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(registry(&tmp));
        let callers = 50;
        let barrier = Arc::new(Barrier::new(callers));

        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.acquire("tenant-a").unwrap()
                })
            })
            .collect();

        let acquired: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registry.open_count(), 1);
        for handle in &acquired[1..] {
            assert!(Arc::ptr_eq(&acquired[0], handle));
        }
    }

    #[test]
    fn test_sanitized_ids_share_one_handle() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);

        let a = registry.acquire("My Project!!").unwrap();
        let b = registry.acquire("MyProject").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.open_count(), 1);
    }

    #[test]
    fn test_evict_closes_handle() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);

        let handle = registry.acquire("tenant-a").unwrap();
        assert!(registry.evict("tenant-a"));
        assert!(!handle.is_open());
        assert!(!registry.evict("tenant-a"));

        // Next acquire opens a fresh handle
        let fresh = registry.acquire("tenant-a").unwrap();
        assert!(fresh.is_open());
        assert_eq!(registry.open_count(), 2);
    }

    #[test]
    fn test_acquire_rejects_unusable_id() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        assert!(matches!(
            registry.acquire("!!!"),
            Err(HiveError::Validation(_))
        ));
    }
}
