//! Auto-repair - ordered, idempotent remediation steps
//!
//! Steps run in a fixed order; each is skipped when its precondition is
//! already satisfied and a step failure never stops the remaining
//! independent steps. Mutating steps go through the handle's write queue so
//! repair cannot race ordinary tenant writes.

use super::missing_tables;
use crate::storage::TenantHandle;
use crate::{RepairAction, RepairOutcome, Result};
use tracing::info;

/// Parent/child pairs checked by the orphan step. Child rows whose foreign
/// key no longer resolves are leftovers from pre-foreign-key data or
/// interrupted deletes. `files.uploaded_by` is deliberately absent: a file
/// outliving its uploader is valid data, not an orphan.
const ORPHAN_RULES: &[(&str, &str, &str)] =
    &[("documents", "collection_id", "collections")];

/// Run the repair sequence against one handle.
pub fn auto_fix(handle: &TenantHandle, canonical_schema: &str) -> RepairOutcome {
    let actions = vec![
        fix_schema(handle, canonical_schema),
        fix_orphans(handle),
        vacuum(handle),
    ];
    let outcome = RepairOutcome::from_actions(actions);
    info!(
        "Auto-repair for {}: success={} ({} actions)",
        handle.tenant_id(),
        outcome.success,
        outcome.actions.len()
    );
    outcome
}

/// Step 1: re-apply schema objects the health probe reports missing.
fn fix_schema(handle: &TenantHandle, canonical_schema: &str) -> RepairAction {
    let missing = match missing_tables(handle, canonical_schema) {
        Ok(missing) => missing,
        Err(e) => return RepairAction::failed("schema", e.to_string()),
    };
    if missing.is_empty() {
        return RepairAction::skipped("schema", "all expected tables present");
    }
    match handle.apply_schema(canonical_schema) {
        Ok(_) => RepairAction::done(
            "schema",
            true,
            format!("re-applied missing tables: {}", missing.join(", ")),
        ),
        Err(e) => RepairAction::failed("schema", e.to_string()),
    }
}

/// Step 2: delete child rows with no parent. Rules for tables the store
/// does not have are skipped, so the step works on the catalog handle too.
fn fix_orphans(handle: &TenantHandle) -> RepairAction {
    let mut deleted_total = 0usize;
    let mut applied = Vec::new();

    for (child, fk, parent) in ORPHAN_RULES {
        let present = match has_tables(handle, &[child, parent]) {
            Ok(present) => present,
            Err(e) => return RepairAction::failed("orphans", e.to_string()),
        };
        if !present {
            continue;
        }
        let sql = format!(
            "DELETE FROM {child}
             WHERE {fk} IS NOT NULL
               AND {fk} NOT IN (SELECT id FROM {parent})"
        );
        match handle.execute_write("orphan-cleanup", Box::new(move |conn| Ok(conn.execute(&sql, [])?)))
        {
            Ok(0) => {}
            Ok(deleted) => {
                deleted_total += deleted;
                applied.push(format!("{child}: {deleted}"));
            }
            Err(e) => return RepairAction::failed("orphans", e.to_string()),
        }
    }

    if deleted_total == 0 {
        RepairAction::skipped("orphans", "no orphaned rows")
    } else {
        RepairAction::done(
            "orphans",
            true,
            format!("deleted orphaned rows ({})", applied.join(", ")),
        )
    }
}

/// Step 3: compact the store. Skipped when the freelist is already empty;
/// otherwise checkpoints the write-ahead log and rebuilds the file.
fn vacuum(handle: &TenantHandle) -> RepairAction {
    let freelist = match freelist_pages(handle) {
        Ok(freelist) => freelist,
        Err(e) => return RepairAction::failed("vacuum", e.to_string()),
    };
    if freelist == 0 {
        return RepairAction::skipped("vacuum", "store already compact");
    }

    let result = handle.execute_write(
        "vacuum",
        Box::new(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE); VACUUM;")?;
            Ok(0)
        }),
    );
    match result {
        Ok(_) => RepairAction::done("vacuum", true, format!("reclaimed {freelist} free pages")),
        Err(e) => RepairAction::failed("vacuum", e.to_string()),
    }
}

fn has_tables(handle: &TenantHandle, tables: &[&str]) -> Result<bool> {
    let wanted: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
    handle.read(|conn| {
        let mut stmt = conn
            .prepare("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        for table in &wanted {
            let count: i64 = stmt.query_row([table], |row| row.get(0))?;
            if count == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    })
}

fn freelist_pages(handle: &TenantHandle) -> Result<u64> {
    handle.read(|conn| {
        Ok(conn.query_row("PRAGMA freelist_count", [], |row| row.get::<_, i64>(0))? as u64)
    })
}
