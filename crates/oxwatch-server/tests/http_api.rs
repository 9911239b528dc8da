mod common;

use axum::http::StatusCode;
use common::{build_test_context, create_cpu_rule, push_sample, request_json, request_no_body};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Collects the message of every event emitted on this thread.
#[derive(Clone, Default)]
struct MessageLog(Arc<Mutex<Vec<String>>>);

impl MessageLog {
    fn count(&self, message: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|m| *m == message).count()
    }
}

impl<S: tracing::Subscriber> Layer<S> for MessageLog {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Message(Option<String>);
        impl Visit for Message {
            fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0 = Some(format!("{value:?}"));
                }
            }
        }
        let mut message = Message(None);
        event.record(&mut message);
        if let Some(message) = message.0 {
            self.0.lock().unwrap().push(message);
        }
    }
}

#[tokio::test]
async fn health_reports_ok_with_trace_id() {
    let ctx = build_test_context().await.expect("test context should build");

    let (status, body, trace_id) = request_no_body(&ctx.app, "GET", "/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["err_code"], 0);
    assert_eq!(body["data"]["storage_status"], "ok");
    let trace_id = trace_id.expect("X-Trace-Id header should be set");
    assert_eq!(trace_id.len(), 16);
    assert_eq!(body["trace_id"], trace_id.as_str());
}

#[tokio::test]
async fn invalid_rule_is_rejected_with_reason() {
    let ctx = build_test_context().await.expect("test context should build");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts/rules",
        json!({
            "name": "Bad",
            "metric": "cpu_usage",
            "comparator": "=>",
            "threshold": 80.0,
            "duration_secs": 60,
            "severity": "high"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["err_code"], 1101);
    assert!(body["err_msg"].as_str().unwrap().contains("=>"));

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts/rules",
        json!({
            "name": "Zero",
            "metric": "cpu_usage",
            "comparator": ">=",
            "threshold": 80.0,
            "duration_secs": 0,
            "severity": "high"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_rule_name_conflicts() {
    let ctx = build_test_context().await.expect("test context should build");
    create_cpu_rule(&ctx.app).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts/rules",
        json!({
            "name": "High CPU",
            "metric": "cpu_usage",
            "comparator": ">",
            "threshold": 90.0,
            "duration_secs": 30,
            "severity": "critical"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["err_code"], 1005);
}

#[tokio::test]
async fn invalid_sample_is_rejected() {
    let ctx = build_test_context().await.expect("test context should build");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/metrics",
        json!({ "target_id": " ", "values": { "cpu_usage": 10.0 } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["err_code"], 1102);

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/metrics",
        json!({ "target_id": "7", "values": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn breach_creates_one_event_until_resolved() {
    let ctx = build_test_context().await.expect("test context should build");
    create_cpu_rule(&ctx.app).await;
    push_sample(&ctx.app, "7", json!({ "cpu_usage": 85.0 })).await;

    let (status, body, _) = request_no_body(&ctx.app, "POST", "/v1/alerts/evaluate/7").await;
    assert_eq!(status, StatusCode::OK);
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["triggered_value"], 85.0);
    assert_eq!(events[0]["status"], "firing");
    let first_id = events[0]["id"].as_str().unwrap().to_string();

    // Same breach again: deduplicated.
    let (_, body, _) = request_no_body(&ctx.app, "POST", "/v1/alerts/evaluate/7").await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts/active").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Acknowledged events still suppress.
    let uri = format!("/v1/alerts/events/{first_id}/acknowledge");
    let (status, body, _) = request_no_body(&ctx.app, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "acknowledged");
    let (_, body, _) = request_no_body(&ctx.app, "POST", "/v1/alerts/evaluate/7").await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let uri = format!("/v1/alerts/events/{first_id}/resolve");
    let (status, body, _) = request_no_body(&ctx.app, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "resolved");

    // A new episode after resolution.
    let (_, body, _) = request_no_body(&ctx.app, "POST", "/v1/alerts/evaluate/7").await;
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_ne!(events[0]["id"].as_str().unwrap(), first_id);

    // Acknowledging a resolved event moves it backwards.
    let uri = format!("/v1/alerts/events/{first_id}/acknowledge");
    let (status, _, _) = request_no_body(&ctx.app, "POST", &uri).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn below_threshold_or_missing_metric_creates_nothing() {
    let ctx = build_test_context().await.expect("test context should build");
    create_cpu_rule(&ctx.app).await;
    push_sample(&ctx.app, "7", json!({ "cpu_usage": 60.0 })).await;
    push_sample(&ctx.app, "8", json!({ "memory_usage": 99.0 })).await;

    for uri in ["/v1/alerts/evaluate/7", "/v1/alerts/evaluate/8", "/v1/alerts/evaluate/none"] {
        let (status, body, _) = request_no_body(&ctx.app, "POST", uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert!(body["data"].as_array().unwrap().is_empty(), "{uri}");
    }
}

#[tokio::test]
async fn manual_trigger_is_deduplicated() {
    let ctx = build_test_context().await.expect("test context should build");
    let rule_id = create_cpu_rule(&ctx.app).await;

    let payload = json!({
        "rule_id": rule_id,
        "target_id": "web-01",
        "triggered_value": 99.5,
        "summary": "operator test"
    });
    let (status, body, _) = request_json(&ctx.app, "POST", "/v1/alerts/trigger", payload.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["created"], true);
    assert_eq!(body["data"]["event"]["summary"], "operator test");
    let event_id = body["data"]["event"]["id"].clone();

    let (status, body, _) = request_json(&ctx.app, "POST", "/v1/alerts/trigger", payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["created"], false);
    assert_eq!(body["data"]["open_event_id"], event_id);

    let uri = format!("/v1/alerts/events/{}", event_id.as_str().unwrap());
    let (status, body, _) = request_no_body(&ctx.app, "GET", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["target_id"], "web-01");
}

#[tokio::test]
async fn manual_trigger_reports_bad_input() {
    let ctx = build_test_context().await.expect("test context should build");
    let rule_id = create_cpu_rule(&ctx.app).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts/trigger",
        json!({ "rule_id": "missing", "target_id": "7", "triggered_value": 90.0 }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["err_msg"].as_str().unwrap().contains("missing"));

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts/trigger",
        json!({ "rule_id": rule_id, "target_id": "", "triggered_value": 90.0 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["err_code"], 1103);
}

#[tokio::test]
async fn unknown_event_is_not_found() {
    let ctx = build_test_context().await.expect("test context should build");

    for (method, uri) in [
        ("GET", "/v1/alerts/events/nope"),
        ("POST", "/v1/alerts/events/nope/acknowledge"),
        ("POST", "/v1/alerts/events/nope/resolve"),
    ] {
        let (status, body, _) = request_no_body(&ctx.app, method, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["err_code"], 1004);
    }
}

#[tokio::test]
async fn scheduled_cycle_notifies_and_counts() {
    let ctx = build_test_context().await.expect("test context should build");
    create_cpu_rule(&ctx.app).await;
    push_sample(&ctx.app, "7", json!({ "cpu_usage": 91.0 })).await;
    push_sample(&ctx.app, "8", json!({ "cpu_usage": 92.0 })).await;

    let report = ctx.state.alerts.run_cycle().await;
    assert_eq!(report.targets_total, 2);
    assert_eq!(report.events.len(), 2);
    assert!(report.failures.is_empty());
    let report = ctx.state.alerts.run_cycle().await;
    assert!(report.events.is_empty());
    ctx.state.alerts.flush_notifications().await;

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts/statistics").await;
    assert_eq!(status, StatusCode::OK);
    let stats = &body["data"];
    assert_eq!(stats["total_rules"], 1);
    assert_eq!(stats["targets"], 2);
    assert_eq!(stats["firing_events"], 2);
    assert_eq!(stats["cycles"], 2);
    assert_eq!(stats["events_created"], 2);
    assert_eq!(stats["suppressed_duplicates"], 2);
    // The built-in log channel delivered one notification per event.
    assert_eq!(stats["notifications_delivered"], 2);
}

#[tokio::test]
async fn rule_creation_is_logged_once() {
    let log = MessageLog::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(log.clone()));
    let ctx = build_test_context().await.expect("test context should build");

    create_cpu_rule(&ctx.app).await;

    assert_eq!(log.count("Alert rule created"), 1);
}
