use crate::state::AppState;
use crate::{api, logging};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "oxwatch API",
        description = "Threshold alerting: metric ingestion, rules and alert events",
    ),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Metrics", description = "Metric ingestion"),
        (name = "Alerts", description = "Alert rules, evaluation and events")
    )
)]
struct ApiDoc;

fn openapi_route(spec: Arc<utoipa::openapi::OpenApi>) -> Router {
    Router::new().route(
        "/v1/openapi.json",
        get(move || {
            let spec = spec.clone();
            async move {
                match spec.to_json() {
                    Ok(json) => (
                        StatusCode::OK,
                        [(header::CONTENT_TYPE, "application/json")],
                        json,
                    )
                        .into_response(),
                    Err(e) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Failed to serialize OpenAPI document: {e}"),
                    )
                        .into_response(),
                }
            }
        }),
    )
}

pub fn build_http_app(state: AppState) -> Router {
    let (router, routes_spec) = api::public_routes().split_for_parts();

    let mut spec = ApiDoc::openapi();
    spec.merge(routes_spec);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .with_state(state)
        .merge(openapi_route(Arc::new(spec)))
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
