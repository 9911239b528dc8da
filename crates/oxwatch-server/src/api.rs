pub mod alerts;

use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use oxwatch_alert::{EvaluationError, StoreError};
use oxwatch_common::types::MetricSample;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Error envelope.
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
}

/// Response envelope; `err_code` is 0 on success.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "conflict" => 1005,
        "invalid_rule" => 1101,
        "invalid_metrics" => 1102,
        "invalid_trigger" => 1103,
        "internal_error" => 1500,
        "storage_error" => 1501,
        "timeout" => 1502,
        "dedup_unavailable" => 1503,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

pub(crate) fn store_error_response(trace_id: &str, err: &StoreError) -> Response {
    match err {
        StoreError::NotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, trace_id, "not_found", &err.to_string())
        }
        StoreError::Conflict(msg) => error_response(StatusCode::CONFLICT, trace_id, "conflict", msg),
        StoreError::InvalidReference(msg) => {
            error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", msg)
        }
        StoreError::Timeout { .. } => {
            tracing::error!(trace_id = %trace_id, error = %err, "Store call timed out");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                trace_id,
                "timeout",
                &err.to_string(),
            )
        }
        StoreError::Backend(e) => {
            tracing::error!(trace_id = %trace_id, error = %e, "Store call failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

pub(crate) fn evaluation_error_response(trace_id: &str, err: &EvaluationError) -> Response {
    match err {
        EvaluationError::Dependency { source, .. } => store_error_response(trace_id, source),
        EvaluationError::TargetTimeout(_) => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            trace_id,
            "timeout",
            &err.to_string(),
        ),
        EvaluationError::DedupUnavailable { .. } => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            trace_id,
            "dedup_unavailable",
            &err.to_string(),
        ),
        EvaluationError::UnknownRule(_) => {
            error_response(StatusCode::NOT_FOUND, trace_id, "not_found", &err.to_string())
        }
        EvaluationError::InvalidTrigger(msg) => {
            error_response(StatusCode::BAD_REQUEST, trace_id, "invalid_trigger", msg)
        }
    }
}

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    storage_status: String,
    evaluation_enabled: bool,
}

/// Service health.
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    let storage_status = match state.store.count_rules().await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the store");
            "unavailable"
        }
    };
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            storage_status: storage_status.to_string(),
            evaluation_enabled: state.config.evaluation.enabled,
        },
    )
}

/// One metric snapshot pushed by a collector.
#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestMetricsRequest {
    pub target_id: String,
    /// Display name; the target id is used when omitted.
    #[serde(default)]
    pub target_name: Option<String>,
    /// Defaults to the time of receipt.
    #[serde(default)]
    pub collected_at: Option<DateTime<Utc>>,
    pub values: BTreeMap<String, f64>,
}

impl IngestMetricsRequest {
    fn validate(&self) -> Result<(), String> {
        if self.target_id.trim().is_empty() {
            return Err("target_id is required".into());
        }
        if self.values.is_empty() {
            return Err("values must contain at least one metric".into());
        }
        if let Some((name, _)) = self.values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("metric '{name}' is not a finite number"));
        }
        Ok(())
    }
}

/// Ingest one metric sample; the target is registered on first sight.
#[utoipa::path(
    post,
    path = "/v1/metrics",
    tag = "Metrics",
    request_body = IngestMetricsRequest,
    responses(
        (status = 201, description = "Sample stored", body = MetricSample),
        (status = 400, description = "Invalid sample", body = ApiError)
    )
)]
async fn ingest_metrics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<IngestMetricsRequest>,
) -> impl IntoResponse {
    if let Err(msg) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, &trace_id, "invalid_metrics", &msg);
    }
    let target_id = req.target_id.trim();

    if let Some(name) = req.target_name.as_deref().filter(|n| !n.trim().is_empty()) {
        if let Err(e) = state.store.upsert_target(target_id, Some(name.trim())).await {
            return store_error_response(&trace_id, &e);
        }
    }

    let collected_at = req.collected_at.unwrap_or_else(Utc::now);
    match state
        .store
        .insert_sample(target_id, collected_at, req.values)
        .await
    {
        Ok(sample) => success_response(StatusCode::CREATED, &trace_id, sample),
        Err(e) => store_error_response(&trace_id, &e),
    }
}

pub fn public_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(ingest_metrics))
        .merge(alerts::alert_routes())
}
