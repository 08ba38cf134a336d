//! Core types for HiveDB
//!
//! Everything here crosses the boundary to HTTP handlers, so the serialized
//! field names follow the platform's public camelCase envelope.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tenant (project) as recorded in the shared catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRecord {
    /// Stable identifier (UUID or legacy slug)
    pub id: String,
    /// Display name
    pub name: String,
    /// Creation timestamp, ISO-8601
    pub created_at: String,
    /// Test tenants can be bulk-deleted by maintenance tooling
    pub is_test: bool,
}

/// Result of a health check against one handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, serde_json::Value>>,
}

impl HealthReport {
    /// Report a healthy handle
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            details: None,
        }
    }

    /// Report an unhealthy handle
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            details: None,
        }
    }

    /// Attach a structured detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }
}

/// One remediation step attempted by auto-repair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairAction {
    /// Step name: "schema", "orphans", "vacuum", "orphanDirectories"
    pub step: String,
    /// Whether the step executed (false = precondition already satisfied)
    pub ran: bool,
    /// Whether the step changed anything
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepairAction {
    /// Step skipped: nothing to do
    pub fn skipped(step: &str, message: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            ran: false,
            changed: false,
            message: Some(message.into()),
            error: None,
        }
    }

    /// Step executed
    pub fn done(step: &str, changed: bool, message: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            ran: true,
            changed,
            message: Some(message.into()),
            error: None,
        }
    }

    /// Step failed; remaining independent steps still run
    pub fn failed(step: &str, error: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            ran: true,
            changed: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of an auto-repair run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub success: bool,
    pub actions: Vec<RepairAction>,
}

impl RepairOutcome {
    /// Build an outcome from its actions; success means no step failed
    pub fn from_actions(actions: Vec<RepairAction>) -> Self {
        Self {
            success: actions.iter().all(|a| a.error.is_none()),
            actions,
        }
    }
}

/// An operation still waiting in a write queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub label: String,
    /// Milliseconds spent waiting so far
    pub waited_ms: f64,
}

/// Snapshot of one handle's write-queue state
///
/// `queue_size` and `processing_count` are instantaneous; the `total_*`
/// counters are monotonic for the process lifetime. Averages are running
/// means in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub queue_size: usize,
    pub processing_count: usize,
    pub total_processed: u64,
    pub total_errors: u64,
    /// Operations skipped because their deadline elapsed while queued;
    /// these count neither as processed nor as errors
    pub total_expired: u64,
    pub average_wait_time: f64,
    pub average_process_time: f64,
    pub queue_items: Vec<QueueItem>,
}

impl QueueMetrics {
    /// Aggregate snapshots from several handles into one view.
    ///
    /// Counters sum; averages are weighted by the number of operations
    /// they were computed over.
    pub fn aggregate<I: IntoIterator<Item = QueueMetrics>>(snapshots: I) -> QueueMetrics {
        let mut total = QueueMetrics::default();
        let mut wait_weight = 0u64;
        let mut process_weight = 0u64;

        for m in snapshots {
            total.queue_size += m.queue_size;
            total.processing_count += m.processing_count;
            total.total_processed += m.total_processed;
            total.total_errors += m.total_errors;
            total.total_expired += m.total_expired;
            total.queue_items.extend(m.queue_items);

            // Wait averages cover started operations, process averages
            // cover finished ones.
            let started = m.total_processed + m.processing_count as u64;
            if started > 0 {
                total.average_wait_time += m.average_wait_time * started as f64;
                wait_weight += started;
            }
            if m.total_processed > 0 {
                total.average_process_time += m.average_process_time * m.total_processed as f64;
                process_weight += m.total_processed;
            }
        }

        if wait_weight > 0 {
            total.average_wait_time /= wait_weight as f64;
        }
        if process_weight > 0 {
            total.average_process_time /= process_weight as f64;
        }
        total
    }
}

/// Per-tenant slice of the engine statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStats {
    pub id: String,
    /// On-disk size of the tenant store file
    pub file_size_bytes: u64,
    /// Seconds since the handle last served an operation
    pub idle_secs: u64,
    pub queue: QueueMetrics,
}

/// Engine-wide statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Tenants with a catalog entry
    pub tenant_count: usize,
    /// Handles currently open (shared catalog excluded)
    pub open_handles: usize,
    /// Queue metrics aggregated across the catalog and all open handles
    pub queue: QueueMetrics,
    pub tenants: Vec<TenantStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_sums_counters() {
        let a = QueueMetrics {
            queue_size: 2,
            total_processed: 10,
            total_errors: 1,
            average_wait_time: 4.0,
            average_process_time: 8.0,
            ..Default::default()
        };
        let b = QueueMetrics {
            queue_size: 1,
            total_processed: 30,
            average_wait_time: 8.0,
            average_process_time: 4.0,
            ..Default::default()
        };

        let total = QueueMetrics::aggregate([a, b]);
        assert_eq!(total.queue_size, 3);
        assert_eq!(total.total_processed, 40);
        assert_eq!(total.total_errors, 1);
        // weighted: (4*10 + 8*30) / 40 = 7.0
        assert!((total.average_wait_time - 7.0).abs() < f64::EPSILON);
        // weighted: (8*10 + 4*30) / 40 = 5.0
        assert!((total.average_process_time - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_envelope_field_names() {
        let json = serde_json::to_value(QueueMetrics::default()).unwrap();
        for key in [
            "queueSize",
            "processingCount",
            "totalProcessed",
            "totalErrors",
            "averageWaitTime",
            "averageProcessTime",
            "queueItems",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_repair_outcome_success() {
        let ok = RepairOutcome::from_actions(vec![
            RepairAction::skipped("schema", "all tables present"),
            RepairAction::done("vacuum", true, "reclaimed 3 pages"),
        ]);
        assert!(ok.success);

        let failed = RepairOutcome::from_actions(vec![
            RepairAction::done("schema", true, "re-applied"),
            RepairAction::failed("vacuum", "disk full"),
        ]);
        assert!(!failed.success);
    }
}
