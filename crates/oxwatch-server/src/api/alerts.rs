use crate::api::{
    error_response, evaluation_error_response, store_error_response, success_response, ApiError,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use oxwatch_alert::store::EventStore;
use oxwatch_alert::{validate_rule, ManualTrigger, StoreError, TriggerOutcome};
use oxwatch_common::types::{AlertEvent, AlertRule, RuleDraft};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

// ---- Rules ----

/// Create an alert rule. The draft is validated before it is stored.
#[utoipa::path(
    post,
    path = "/v1/alerts/rules",
    tag = "Alerts",
    request_body = RuleDraft,
    responses(
        (status = 201, description = "Rule created", body = AlertRule),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 409, description = "Rule name already exists", body = ApiError)
    )
)]
async fn create_alert_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(draft): Json<RuleDraft>,
) -> impl IntoResponse {
    let rule = match validate_rule(&draft) {
        Ok(rule) => rule,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "invalid_rule",
                &e.to_string(),
            )
        }
    };

    match state.store.insert_rule(rule).await {
        Ok(rule) => success_response(StatusCode::CREATED, &trace_id, rule),
        Err(StoreError::Conflict(_)) => error_response(
            StatusCode::CONFLICT,
            &trace_id,
            "conflict",
            "Rule name already exists",
        ),
        Err(e) => store_error_response(&trace_id, &e),
    }
}

// ---- Escape hatches ----

/// Evaluate one target now. Same deduplication as the scheduled cycle;
/// returns only the events this call created.
#[utoipa::path(
    post,
    path = "/v1/alerts/evaluate/{target_id}",
    tag = "Alerts",
    params(("target_id" = String, Path, description = "Target id")),
    responses(
        (status = 200, description = "Events created by this evaluation", body = Vec<AlertEvent>),
        (status = 503, description = "A dependency is unavailable", body = ApiError),
        (status = 504, description = "Evaluation exceeded its budget", body = ApiError)
    )
)]
async fn evaluate_target(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(target_id): Path<String>,
) -> impl IntoResponse {
    match state.alerts.evaluate_target(&target_id).await {
        Ok(events) => success_response(StatusCode::OK, &trace_id, events),
        Err(e) => {
            tracing::warn!(target_id = %target_id, error = %e, "Manual evaluation failed");
            evaluation_error_response(&trace_id, &e)
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TriggerAlertRequest {
    pub rule_id: String,
    pub target_id: String,
    pub triggered_value: f64,
    /// Replaces the generated summary.
    #[serde(default)]
    pub summary: Option<String>,
}

impl From<TriggerAlertRequest> for ManualTrigger {
    fn from(req: TriggerAlertRequest) -> Self {
        ManualTrigger {
            rule_id: req.rule_id,
            target_id: req.target_id,
            triggered_value: req.triggered_value,
            summary: req.summary,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerAlertResponse {
    /// False when an open event already covers the rule/target pair.
    pub created: bool,
    pub event: Option<AlertEvent>,
    pub open_event_id: Option<String>,
}

/// Raise an alert from an explicit payload.
#[utoipa::path(
    post,
    path = "/v1/alerts/trigger",
    tag = "Alerts",
    request_body = TriggerAlertRequest,
    responses(
        (status = 201, description = "Alert event created", body = TriggerAlertResponse),
        (status = 200, description = "Suppressed by an open event", body = TriggerAlertResponse),
        (status = 400, description = "Invalid payload", body = ApiError),
        (status = 404, description = "Unknown rule", body = ApiError),
        (status = 503, description = "Open-event lookup unavailable", body = ApiError)
    )
)]
async fn trigger_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<TriggerAlertRequest>,
) -> impl IntoResponse {
    match state.alerts.trigger(req.into()).await {
        Ok(TriggerOutcome::Created(event)) => success_response(
            StatusCode::CREATED,
            &trace_id,
            TriggerAlertResponse {
                created: true,
                event: Some(event),
                open_event_id: None,
            },
        ),
        Ok(TriggerOutcome::Suppressed { open_event_id }) => success_response(
            StatusCode::OK,
            &trace_id,
            TriggerAlertResponse {
                created: false,
                event: None,
                open_event_id,
            },
        ),
        Err(e) => evaluation_error_response(&trace_id, &e),
    }
}

// ---- Lifecycle ----

/// Open (firing or acknowledged) alert events, newest first.
#[utoipa::path(
    get,
    path = "/v1/alerts/active",
    tag = "Alerts",
    responses(
        (status = 200, description = "Open alert events", body = Vec<AlertEvent>)
    )
)]
async fn active_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.store.list_open_events().await {
        Ok(events) => success_response(StatusCode::OK, &trace_id, events),
        Err(e) => store_error_response(&trace_id, &e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/alerts/events/{id}",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert event id")),
    responses(
        (status = 200, description = "Alert event", body = AlertEvent),
        (status = 404, description = "Alert event not found", body = ApiError)
    )
)]
async fn get_alert_event(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_event(&id).await {
        Ok(Some(event)) => success_response(StatusCode::OK, &trace_id, event),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            "Alert event not found",
        ),
        Err(e) => store_error_response(&trace_id, &e),
    }
}

#[utoipa::path(
    post,
    path = "/v1/alerts/events/{id}/acknowledge",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert event id")),
    responses(
        (status = 200, description = "Alert acknowledged", body = AlertEvent),
        (status = 404, description = "Alert event not found", body = ApiError),
        (status = 409, description = "Alert event already resolved", body = ApiError)
    )
)]
async fn acknowledge_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.acknowledge(&id).await {
        Ok(event) => success_response(StatusCode::OK, &trace_id, event),
        Err(e) => store_error_response(&trace_id, &e),
    }
}

#[utoipa::path(
    post,
    path = "/v1/alerts/events/{id}/resolve",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert event id")),
    responses(
        (status = 200, description = "Alert resolved", body = AlertEvent),
        (status = 404, description = "Alert event not found", body = ApiError)
    )
)]
async fn resolve_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.resolve(&id).await {
        Ok(event) => success_response(StatusCode::OK, &trace_id, event),
        Err(e) => store_error_response(&trace_id, &e),
    }
}

// ---- Statistics ----

#[derive(Debug, Serialize, ToSchema)]
pub struct AlertStatisticsResponse {
    pub total_rules: u64,
    pub enabled_rules: u64,
    pub targets: u64,
    pub total_events: u64,
    pub firing_events: u64,
    pub acknowledged_events: u64,
    pub resolved_events: u64,
    pub events_last_24h: u64,
    pub cycles: u64,
    pub targets_evaluated: u64,
    pub target_failures: u64,
    pub rule_failures: u64,
    pub stale_samples: u64,
    pub suppressed_duplicates: u64,
    pub events_created: u64,
    pub notifications_delivered: u64,
    pub notifications_suppressed: u64,
    pub notification_failures: u64,
}

/// Store counts plus engine and notifier counters since startup.
#[utoipa::path(
    get,
    path = "/v1/alerts/statistics",
    tag = "Alerts",
    responses(
        (status = 200, description = "Alert statistics", body = AlertStatisticsResponse)
    )
)]
async fn alert_statistics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let stored = match state.store.statistics().await {
        Ok(stats) => stats,
        Err(e) => return store_error_response(&trace_id, &e),
    };
    let engine = state.alerts.evaluator_stats();
    let notifier = state.alerts.notifier_stats().await;

    success_response(
        StatusCode::OK,
        &trace_id,
        AlertStatisticsResponse {
            total_rules: stored.total_rules,
            enabled_rules: stored.enabled_rules,
            targets: stored.targets,
            total_events: stored.total_events,
            firing_events: stored.firing_events,
            acknowledged_events: stored.acknowledged_events,
            resolved_events: stored.resolved_events,
            events_last_24h: stored.events_last_24h,
            cycles: engine.cycles,
            targets_evaluated: engine.targets_evaluated,
            target_failures: engine.target_failures,
            rule_failures: engine.rule_failures,
            stale_samples: engine.stale_samples,
            suppressed_duplicates: engine.suppressed,
            events_created: engine.events_created,
            notifications_delivered: notifier.delivered,
            notifications_suppressed: notifier.suppressed,
            notification_failures: notifier.failed_deliveries,
        },
    )
}

pub fn alert_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_alert_rule))
        .routes(routes!(evaluate_target))
        .routes(routes!(trigger_alert))
        .routes(routes!(active_alerts))
        .routes(routes!(get_alert_event))
        .routes(routes!(acknowledge_alert))
        .routes(routes!(resolve_alert))
        .routes(routes!(alert_statistics))
}
