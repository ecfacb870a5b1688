use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use crate::AppState;

#[derive(Serialize, utoipa::ToSchema)]
pub struct ReadinessResponse { pub status: &'static str }

/// Readiness probe: the deployment record store answers a ping.
#[utoipa::path(get, path = "/readyz", responses(
    (status = 200, body = ReadinessResponse, description = "Service ready"),
    (status = 503, body = ReadinessResponse, description = "Record store not reachable")
))]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    match state.deployments.ping().await {
        Ok(()) => (StatusCode::OK, Json(ReadinessResponse { status: "ready" })),
        Err(e) => {
            tracing::warn!(event = "readiness.store_unreachable", error = %e);
            (StatusCode::SERVICE_UNAVAILABLE, Json(ReadinessResponse { status: "degraded" }))
        }
    }
}
