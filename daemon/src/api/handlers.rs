//! REST API handlers.
//!
//! Everything except `/health` answers with the `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use super::ApiState;
use super::service::ServiceAction;
use crate::storage::MetricsStore;

const DEFAULT_RESULT_LIMIT: usize = 20;
const MAX_RESULT_LIMIT: usize = 1000;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.engine.health().await)
}

/// GET /api/v1/results/latest
pub async fn latest_result(State(state): State<ApiState>) -> impl IntoResponse {
    let latest = match state.results.lock() {
        Ok(db) => db.latest(),
        Err(_) => return error_response("result store unavailable", StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    };

    match latest {
        Ok(Some(result)) => ApiResponse::ok(result).into_response(),
        Ok(None) => error_response("no results recorded yet", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/results?limit=N
pub async fn list_results(
    State(state): State<ApiState>,
    Query(query): Query<ResultsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_RESULT_LIMIT).clamp(1, MAX_RESULT_LIMIT);

    let results = match state.results.lock() {
        Ok(db) => db.recent(limit),
        Err(_) => return error_response("result store unavailable", StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    };

    match results {
        Ok(results) => ApiResponse::ok(results).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/service/status
///
/// Lifecycle actions share the path segment but are POST-only.
pub async fn service_query(
    State(state): State<ApiState>,
    Path(query): Path<String>,
) -> impl IntoResponse {
    match ServiceAction::from_name(&query) {
        Some(ServiceAction::Status) => run_service(&state, ServiceAction::Status).await,
        Some(action) => error_response(
            &format!("'{}' changes the service, use POST", action.as_str()),
            StatusCode::METHOD_NOT_ALLOWED,
        )
        .into_response(),
        None => error_response(&format!("unknown service query '{}'", query), StatusCode::NOT_FOUND).into_response(),
    }
}

/// POST /api/v1/service/{action}
pub async fn service_action(
    State(state): State<ApiState>,
    Path(action): Path<String>,
) -> impl IntoResponse {
    match ServiceAction::from_name(&action) {
        Some(ServiceAction::Status) | None => error_response(
            &format!("unknown action '{}', expected start, stop or restart", action),
            StatusCode::BAD_REQUEST,
        )
        .into_response(),
        Some(action) => run_service(&state, action).await,
    }
}

async fn run_service(state: &ApiState, action: ServiceAction) -> axum::response::Response {
    match state.service.run(action).await {
        Ok(output) if output.success => ApiResponse::ok(output).into_response(),
        Ok(output) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse {
                success: false,
                error: Some(format!("{} {} failed", action.as_str(), output.unit)),
                data: Some(output),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}
