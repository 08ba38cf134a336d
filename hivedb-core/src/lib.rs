//! HiveDB Core - Multi-Tenant Embedded Storage Layer
//!
//! A storage layer that gives every tenant (project) its own isolated
//! embedded database and keeps those databases healthy:
//!
//! - **TenantDirectory**: one directory per tenant under a common root,
//!   with detection and cleanup of the legacy single-file layout
//! - **ConnectionRegistry**: at most one open handle per tenant, cached
//!   for the process lifetime
//! - **WriteQueue**: strict FIFO serialization of mutating operations per
//!   handle, with wait/process metrics
//! - **HealthMonitor / AutoRepair**: connectivity, schema and integrity
//!   probes plus idempotent remediation (schema re-apply, orphan cleanup,
//!   vacuum)
//! - **DialectTranslator**: canonical (Postgres-flavored) DDL rewritten
//!   into the embedded engine's dialect
//!
//! The embedded engine is SQLite; it provides SQL execution, while this
//! crate provides tenant isolation, write ordering and survivability.

pub mod catalog;
pub mod dialect;
pub mod health;
pub mod queue;
pub mod storage;

mod error;
mod types;

pub use error::{HiveError, Result};
pub use types::*;

/// HiveDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Shared catalog database file name at the storage root
    pub const CATALOG_FILE: &str = "catalog.db";

    /// Store file name inside a tenant's directory
    pub const TENANT_FILE: &str = "tenant.db";

    /// Sentinel tenant id used for the shared catalog handle
    pub const CATALOG_TENANT_ID: &str = "_catalog";

    /// File name prefix of the legacy single-file-per-tenant layout
    pub const LEGACY_PREFIX: &str = "tenant_";

    /// Busy timeout applied to every connection (milliseconds)
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;
}
