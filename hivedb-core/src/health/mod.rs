//! Health monitor - probes against an open handle
//!
//! Three probes run in order: liveness (a no-op read), schema presence
//! (expected tables vs the engine catalog) and integrity (the engine's
//! consistency check). A dead connection short-circuits the later probes;
//! otherwise each probe contributes independently to the report.

pub mod repair;

use crate::storage::TenantHandle;
use crate::{dialect, HealthReport, Result};
use serde_json::json;
use std::collections::HashSet;

/// Run all probes against a handle.
pub fn check(handle: &TenantHandle, canonical_schema: &str) -> HealthReport {
    if let Err(e) = liveness(handle) {
        return HealthReport::unhealthy("connection failed")
            .with_detail("error", json!(e.to_string()));
    }

    let mut problems = Vec::new();
    let mut report = HealthReport::healthy("ok");

    match missing_tables(handle, canonical_schema) {
        Ok(missing) if missing.is_empty() => {}
        Ok(missing) => {
            problems.push(format!("missing tables: {}", missing.join(", ")));
            report = report.with_detail("missingTables", json!(missing));
        }
        Err(e) => {
            problems.push("schema probe failed".to_string());
            report = report.with_detail("schemaError", json!(e.to_string()));
        }
    }

    match integrity(handle) {
        Ok(findings) if findings.is_empty() => {}
        Ok(findings) => {
            problems.push("corruption detected".to_string());
            report = report.with_detail("integrity", json!(findings));
        }
        Err(e) => {
            // The probe itself could not run; record it without deciding
            // the store is corrupt.
            report = report.with_detail("integrityError", json!(e.to_string()));
        }
    }

    if !problems.is_empty() {
        report.healthy = false;
        report.message = problems.join("; ");
    }
    report
}

/// Probe (a): a trivial read proving the connection works.
pub fn liveness(handle: &TenantHandle) -> Result<()> {
    handle.read(|conn| {
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    })
}

/// Probe (b): expected tables absent from the store.
pub fn missing_tables(handle: &TenantHandle, canonical_schema: &str) -> Result<Vec<String>> {
    let expected = dialect::expected_tables(canonical_schema);
    handle.read(|conn| {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let present = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(expected
            .into_iter()
            .filter(|table| !present.contains(table))
            .collect())
    })
}

/// Probe (c): engine-native consistency check. Returns the reported
/// findings; an empty list means the store passed.
pub fn integrity(handle: &TenantHandle) -> Result<Vec<String>> {
    handle.read(|conn| {
        let mut stmt = conn.prepare("PRAGMA quick_check")?;
        let lines = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(lines.into_iter().filter(|line| line != "ok").collect())
    })
}
