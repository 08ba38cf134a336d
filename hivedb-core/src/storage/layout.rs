//! Tenant directory layout
//!
//! Current layout: `<root>/catalog.db` plus one `<root>/<tenant id>/`
//! directory per tenant holding `tenant.db` and its engine sidecar files.
//! The legacy layout (`<root>/tenant_<id>.db` plus `-wal`/`-shm` sidecars)
//! is detected and cleaned by maintenance tooling but never written.

use crate::{config, HiveError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

static UUID_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

static LEGACY_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^{}[A-Za-z0-9_-]+\.db(-wal|-shm)?$",
        config::LEGACY_PREFIX
    ))
    .unwrap()
});

/// Sanitize a tenant id into a filesystem-safe directory name.
///
/// Canonical UUIDs pass through unchanged, hyphens included (stripping them
/// would collide distinct identifiers and break catalog lookups). Anything
/// else keeps only `[A-Za-z0-9_-]`. May return an empty string; callers
/// must treat that as a validation failure.
pub fn sanitize(tenant_id: &str) -> String {
    if UUID_SHAPE.is_match(tenant_id) {
        return tenant_id.to_string();
    }
    tenant_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Maps tenant identifiers to isolated on-disk storage locations.
#[derive(Debug, Clone)]
pub struct TenantLayout {
    root: PathBuf,
}

impl TenantLayout {
    /// Open a layout rooted at `root`, creating it if absent.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the shared catalog database.
    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(config::CATALOG_FILE)
    }

    /// Resolve a tenant id to its store file path, creating the tenant
    /// directory if absent. Idempotent.
    pub fn resolve(&self, tenant_id: &str) -> Result<PathBuf> {
        let dir = self.tenant_dir(tenant_id)?;
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join(config::TENANT_FILE))
    }

    /// Directory a tenant id maps to, without creating anything.
    pub fn tenant_dir(&self, tenant_id: &str) -> Result<PathBuf> {
        let clean = sanitize(tenant_id);
        if clean.is_empty() {
            return Err(HiveError::Validation(format!(
                "tenant id {tenant_id:?} contains no usable characters"
            )));
        }
        Ok(self.root.join(clean))
    }

    /// Names of tenant directories currently present under the root.
    pub fn list_tenant_dirs(&self) -> Result<Vec<String>> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            dirs.push(name);
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Enumerate legacy single-file stores (`tenant_<id>.db`) and their
    /// sidecar files at the root.
    pub fn legacy_artifacts(&self) -> Result<Vec<PathBuf>> {
        let mut artifacts = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if LEGACY_FILE.is_match(&name) {
                artifacts.push(entry.path());
            }
        }
        artifacts.sort();
        Ok(artifacts)
    }

    /// Delete every legacy artifact. One-way migration cleanup; returns the
    /// number of files removed.
    pub fn clean_legacy(&self) -> Result<usize> {
        let artifacts = self.legacy_artifacts()?;
        let mut removed = 0;
        for path in artifacts {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("failed to remove legacy artifact {:?}: {}", path, e),
            }
        }
        if removed > 0 {
            info!("Removed {} legacy artifact(s)", removed);
        }
        Ok(removed)
    }

    /// Recursively delete a tenant's directory. Best-effort: absent
    /// directories and partial failures are logged, never raised.
    pub fn remove(&self, tenant_id: &str) {
        let dir = match self.tenant_dir(tenant_id) {
            Ok(dir) => dir,
            Err(_) => return,
        };
        if !dir.exists() {
            return;
        }
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => info!("Removed tenant directory {:?}", dir),
            Err(e) => warn!("failed to fully remove tenant directory {:?}: {}", dir, e),
        }
    }
}
