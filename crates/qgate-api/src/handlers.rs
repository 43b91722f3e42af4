//! HTTP handlers for queries, jobs and gateway introspection

use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use qgate_core::{AppError, ErrorBody, ErrorCode, ExecutionContext, MetricsSummary};
use qgate_jobs::{JobLifecycleManager, JobStatus, QueryJob};
use qgate_query::{
    DataSourceSummary, FilterField, OrderField, QueryMetadata, QueryRequest, QueryResponse,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::error;
use utoipa::OpenApi;

use crate::coordinator::QueryOutcome;
use crate::extract::{async_requested, ApiKey};
use crate::state::AppState;
use crate::types::{AcceptedJob, HealthResponse, MetricsResponse, QueryParams};

#[derive(OpenApi)]
#[openapi(
    paths(
        query_table,
        get_job,
        get_jobs_by_hash,
        health,
        metrics_summary,
        list_datasources
    ),
    components(
        schemas(
            QueryRequest,
            OrderField,
            FilterField,
            QueryResponse,
            QueryMetadata,
            AcceptedJob,
            QueryJob,
            JobStatus,
            HealthResponse,
            MetricsResponse,
            MetricsSummary,
            DataSourceSummary,
            ErrorBody,
            ErrorCode
        )
    ),
    tags(
        (name = "Data", description = "Single-table queries against registered data sources"),
        (name = "Jobs", description = "Deferred query jobs"),
        (name = "Gateway", description = "Health, metrics and data source listing")
    )
)]
pub struct ApiDoc;

pub fn configure_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/data/{source}/{table}", post(query_table))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/hash/{payload_hash}", get(get_jobs_by_hash))
        .route("/health", get(health))
        .route("/metrics", get(metrics_summary))
        .route("/datasources", get(list_datasources))
        .route("/openapi.json", get(openapi_json))
}

/// Full application router with request tracing and panic recovery
pub fn router(state: Arc<AppState>) -> Router {
    apply_middleware(configure_routes().with_state(state))
}

/// Shared middleware stack; a panicking handler becomes a 500 `INTERNAL_ERROR`
pub fn apply_middleware(app: Router) -> Router {
    app.layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let reason = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!("Handler panicked: {}", reason);
    AppError::internal("internal error").into_response()
}

/// Query a table, synchronously or as a deferred job
#[utoipa::path(
    tag = "Data",
    post,
    path = "/data/{source}/{table}",
    params(
        ("source" = String, Path, description = "Registered data source name"),
        ("table" = String, Path, description = "Table to read"),
        ("X-API-Key" = Option<String>, Header, description = "Caller identity"),
        ("Prefer" = Option<String>, Header, description = "`respond-async` defers execution"),
        QueryParams
    ),
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Query executed", body = QueryResponse),
        (status = 202, description = "Query deferred to a job", body = AcceptedJob),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 403, description = "Blocked column referenced", body = ErrorBody),
        (status = 404, description = "Unknown data source", body = ErrorBody),
        (status = 500, description = "Query or enqueue failed", body = ErrorBody)
    )
)]
pub async fn query_table(
    State(state): State<Arc<AppState>>,
    Path((source, table)): Path<(String, String)>,
    Query(params): Query<QueryParams>,
    api_key: ApiKey,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: QueryRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::invalid_input("invalid request body").with_detail("reason", e.to_string()))?;

    let coordinator = &state.coordinator;
    let mode = coordinator.mode_for(async_requested(params.async_mode.as_deref(), &headers));
    let ctx = ExecutionContext::new();

    let outcome = coordinator
        .execute(&ctx, &source, &table, request, api_key.into_inner(), mode)
        .await?;

    Ok(match outcome {
        QueryOutcome::Completed(response) => (StatusCode::OK, Json(response)).into_response(),
        QueryOutcome::Accepted(job) => (StatusCode::ACCEPTED, Json(job)).into_response(),
    })
}

fn job_store(state: &AppState) -> Result<&JobLifecycleManager, AppError> {
    state
        .jobs
        .as_ref()
        .ok_or_else(|| AppError::unavailable("job repository unavailable"))
}

/// Fetch one job by id
#[utoipa::path(
    tag = "Jobs",
    get,
    path = "/jobs/{job_id}",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job found", body = QueryJob),
        (status = 404, description = "Job not found", body = ErrorBody),
        (status = 503, description = "Job store not configured", body = ErrorBody)
    )
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<QueryJob>, AppError> {
    let job = job_store(&state)?
        .get(&job_id)
        .await?
        .ok_or_else(|| AppError::not_found("job not found").with_detail("jobId", &job_id))?;
    Ok(Json(job))
}

/// List jobs created from requests with the given payload hash
#[utoipa::path(
    tag = "Jobs",
    get,
    path = "/jobs/hash/{payload_hash}",
    params(("payload_hash" = String, Path, description = "SHA-256 of the canonical request")),
    responses(
        (status = 200, description = "Matching jobs, oldest first", body = Vec<QueryJob>),
        (status = 503, description = "Job store not configured", body = ErrorBody)
    )
)]
pub async fn get_jobs_by_hash(
    State(state): State<Arc<AppState>>,
    Path(payload_hash): Path<String>,
) -> Result<Json<Vec<QueryJob>>, AppError> {
    let jobs = job_store(&state)?.find_by_payload_hash(&payload_hash).await?;
    Ok(Json(jobs))
}

#[utoipa::path(
    tag = "Gateway",
    get,
    path = "/health",
    responses((status = 200, description = "Gateway is up", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        env: state.environment.clone(),
    })
}

/// Per-data-source aggregates over the rolling metrics window
#[utoipa::path(
    tag = "Gateway",
    get,
    path = "/metrics",
    responses((status = 200, description = "Metrics summary", body = MetricsResponse))
)]
pub async fn metrics_summary(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        summary: state.metrics.summarize(),
        total: state.metrics.len(),
    })
}

/// Registered data sources without connection details
#[utoipa::path(
    tag = "Gateway",
    get,
    path = "/datasources",
    responses(
        (status = 200, description = "Data sources", body = Vec<DataSourceSummary>),
        (status = 500, description = "Listing failed", body = ErrorBody)
    )
)]
pub async fn list_datasources(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DataSourceSummary>>, AppError> {
    Ok(Json(state.queries.list_data_sources().await?))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
