use crate::lifecycle::{LivenessReport, LivenessStatus, ReadinessReport};
use crate::openapi::HEALTH_TAG;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Liveness: degraded while a dependency is down, unhealthy once the
/// service failed or is shutting down
#[utoipa::path(
    get,
    path = "/health",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Process is up (healthy or degraded)", body = LivenessReport),
        (status = 503, description = "Process has failed or is shutting down", body = LivenessReport)
    )
)]
async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.lifecycle.liveness();
    let status_code = match report.status {
        LivenessStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        LivenessStatus::Healthy | LivenessStatus::Degraded => StatusCode::OK,
    };
    (status_code, Json(report))
}

/// Readiness: `not_ready` whenever the database is unavailable
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Instance accepts traffic", body = ReadinessReport),
        (status = 503, description = "Instance must not receive traffic", body = ReadinessReport)
    )
)]
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.lifecycle.readiness();
    let status_code = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(report))
}

pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(liveness))
        .routes(routes!(readiness))
}
