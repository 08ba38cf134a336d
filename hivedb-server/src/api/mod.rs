//! HTTP API endpoints
//!
//! Thin layer over the storage engine: decode the request, run the engine
//! call on a blocking worker, shape the response. Operational endpoints
//! (health, repair, queue metrics) always answer 200 with the computed
//! state; they only fail when the engine itself cannot run the operation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use hivedb_core::storage::StorageEngine;
use hivedb_core::{
    EngineStats, HealthReport, HiveError, QueueMetrics, RepairOutcome, TenantRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state
pub type AppState = Arc<StorageEngine>;

/// Create the API router
pub fn create_router(engine: Arc<StorageEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/ping", get(ping))
        .route("/health", get(catalog_health))
        .route("/health/all", get(all_health))
        .route("/health/:tenant", get(tenant_health))
        // Repair
        .route("/repair", post(catalog_repair))
        .route("/repair/:tenant", post(tenant_repair))
        // Queue metrics
        .route("/queue", get(aggregate_queue))
        .route("/queue/:tenant", get(tenant_queue))
        // Stats
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        // Tenant lifecycle
        .route("/tenants", get(list_tenants).post(create_tenant))
        .route("/tenants/:tenant", delete(delete_tenant))
        // Execution
        .route("/tenants/:tenant/execute", post(execute))
        .route("/tenants/:tenant/query", post(query))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenantRequest {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub is_test: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    /// Optional deadline in milliseconds; elapses while still queued ->
    /// the operation is skipped and fails with a timeout
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    #[serde(rename = "rowsAffected")]
    pub rows_affected: usize,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Handlers
// ============================================================================

async fn ping() -> &'static str {
    "pong"
}

async fn catalog_health(State(engine): State<AppState>) -> Result<Json<HealthReport>, ApiError> {
    blocking(move || Ok(engine.check_health(None))).await
}

async fn tenant_health(
    State(engine): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<HealthReport>, ApiError> {
    blocking(move || Ok(engine.check_health(Some(&tenant)))).await
}

async fn all_health(
    State(engine): State<AppState>,
) -> Result<Json<BTreeMap<String, HealthReport>>, ApiError> {
    blocking(move || engine.check_all()).await
}

async fn catalog_repair(State(engine): State<AppState>) -> Result<Json<RepairOutcome>, ApiError> {
    blocking(move || Ok(engine.auto_fix(None))).await
}

async fn tenant_repair(
    State(engine): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<RepairOutcome>, ApiError> {
    blocking(move || Ok(engine.auto_fix(Some(&tenant)))).await
}

async fn aggregate_queue(State(engine): State<AppState>) -> Result<Json<QueueMetrics>, ApiError> {
    blocking(move || engine.queue_metrics(None)).await
}

async fn tenant_queue(
    State(engine): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<QueueMetrics>, ApiError> {
    blocking(move || engine.queue_metrics(Some(&tenant))).await
}

async fn stats(State(engine): State<AppState>) -> Result<Json<EngineStats>, ApiError> {
    blocking(move || engine.stats()).await
}

async fn metrics(State(engine): State<AppState>) -> Result<String, ApiError> {
    let stats = blocking(move || engine.stats()).await?.0;
    Ok(render_prometheus(&stats))
}

async fn list_tenants(
    State(engine): State<AppState>,
) -> Result<Json<Vec<TenantRecord>>, ApiError> {
    blocking(move || engine.list_tenants()).await
}

async fn create_tenant(
    State(engine): State<AppState>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<TenantRecord>), ApiError> {
    let record =
        blocking(move || engine.create_tenant(req.id.as_deref(), &req.name, req.is_test)).await?;
    Ok((StatusCode::CREATED, record))
}

async fn delete_tenant(
    State(engine): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<StatusCode, ApiError> {
    blocking(move || engine.delete_tenant(&tenant)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn execute(
    State(engine): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<StatementRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let rows_affected = blocking(move || {
        let deadline = req.deadline_ms.map(std::time::Duration::from_millis);
        engine.execute_write_with_deadline(&tenant, &req.sql, &req.params, deadline)
    })
    .await?
    .0;
    Ok(Json(ExecuteResponse { rows_affected }))
}

async fn query(
    State(engine): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<StatementRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let rows = blocking(move || engine.read_query(&tenant, &req.sql, &req.params))
        .await?
        .0;
    Ok(Json(QueryResponse { rows }))
}

// ============================================================================
// Helpers
// ============================================================================

/// Engine calls block on locks and queue waits; run them off the async
/// workers and map errors to the HTTP taxonomy.
async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> hivedb_core::Result<T> + Send + 'static,
) -> Result<Json<T>, ApiError> {
    let result = tokio::task::spawn_blocking(f).await.map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("engine task failed: {e}"),
        )
    })?;
    result
        .map(Json)
        .map_err(|e| error_response(status_for(&e), e.to_string()))
}

fn status_for(error: &HiveError) -> StatusCode {
    match error {
        HiveError::Validation(_) => StatusCode::BAD_REQUEST,
        HiveError::TenantNotFound(_) => StatusCode::NOT_FOUND,
        HiveError::QueueSaturated(_) => StatusCode::SERVICE_UNAVAILABLE,
        HiveError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        HiveError::Engine(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, error: String) -> ApiError {
    (status, Json(ErrorResponse { error }))
}

fn render_prometheus(stats: &EngineStats) -> String {
    let mut output = String::new();
    output.push_str("# HELP hivedb_tenants_total Tenants recorded in the catalog\n");
    output.push_str("# TYPE hivedb_tenants_total gauge\n");
    output.push_str(&format!("hivedb_tenants_total {}\n", stats.tenant_count));

    output.push_str("# HELP hivedb_open_handles Open tenant handles\n");
    output.push_str("# TYPE hivedb_open_handles gauge\n");
    output.push_str(&format!("hivedb_open_handles {}\n", stats.open_handles));

    output.push_str("# HELP hivedb_queue_size Writes enqueued but not started\n");
    output.push_str("# TYPE hivedb_queue_size gauge\n");
    output.push_str(&format!("hivedb_queue_size {}\n", stats.queue.queue_size));

    output.push_str("# HELP hivedb_writes_total Writes processed since start\n");
    output.push_str("# TYPE hivedb_writes_total counter\n");
    output.push_str(&format!(
        "hivedb_writes_total {}\n",
        stats.queue.total_processed
    ));

    output.push_str("# HELP hivedb_write_errors_total Failed writes since start\n");
    output.push_str("# TYPE hivedb_write_errors_total counter\n");
    output.push_str(&format!(
        "hivedb_write_errors_total {}\n",
        stats.queue.total_errors
    ));

    for tenant in &stats.tenants {
        output.push_str(&format!(
            "hivedb_tenant_writes_total{{tenant=\"{}\"}} {}\n",
            tenant.id, tenant.queue.total_processed
        ));
        output.push_str(&format!(
            "hivedb_tenant_store_bytes{{tenant=\"{}\"}} {}\n",
            tenant.id, tenant.file_size_bytes
        ));
    }

    output
}
