use axum::{Json, extract::{Path, State}};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;
use crate::{AppState, analysis::{AnalysisMetadata, Framework}, auth::UserId, error::{ApiResult, PipelineError}, models::{Deployment, DeploymentStatus}, services::orchestrator::RunOutcome};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentView {
    pub id: Uuid,
    pub name: String,
    pub framework: Framework,
    pub status: DeploymentStatus,
    pub repo_url: Option<String>,
    pub live_url: Option<String>,
    pub error_message: Option<String>,
    pub hosting_project_id: Option<String>,
    pub hosting_deployment_id: Option<String>,
    pub analysis: AnalysisMetadata,
    pub created_at: DateTime<Utc>,
}

impl From<Deployment> for DeploymentView {
    fn from(d: Deployment) -> Self {
        Self {
            id: d.id,
            name: d.name,
            framework: d.framework,
            status: d.status,
            repo_url: d.repo_url,
            live_url: d.live_url,
            error_message: d.error_message,
            hosting_project_id: d.hosting_project_id,
            hosting_deployment_id: d.hosting_deployment_id,
            analysis: d.analysis,
            created_at: d.created_at,
        }
    }
}

/// Run the pipeline for a staged deployment, or retry a failed one.
#[utoipa::path(post, path = "/deployments/{id}/run", params(("id" = Uuid, Path, description = "Deployment id")), responses(
    (status = 200, body = RunOutcome),
    (status = 400, body = crate::error::ApiErrorBody, description = "missing connection, expired upload, or database integration to install"),
    (status = 403, body = crate::error::ApiErrorBody, description = "free tier limit reached"),
    (status = 404, body = crate::error::ApiErrorBody),
    (status = 409, body = crate::error::ApiErrorBody, description = "already building"),
    (status = 500, body = crate::error::ApiErrorBody, description = "provider error"),
))]
#[tracing::instrument(level = "info", skip(state), fields(user_id = %user.as_str()))]
pub async fn run_deployment(State(state): State<AppState>, user: UserId, Path(id): Path<Uuid>) -> ApiResult<Json<RunOutcome>> {
    let outcome = state.orchestrator.run(id, user.as_str()).await?;
    Ok(Json(outcome))
}

/// One deployment owned by the caller.
#[utoipa::path(get, path = "/deployments/{id}", params(("id" = Uuid, Path, description = "Deployment id")), responses(
    (status = 200, body = DeploymentView),
    (status = 404, body = crate::error::ApiErrorBody),
))]
#[tracing::instrument(level = "debug", skip(state), fields(user_id = %user.as_str()))]
pub async fn get_deployment(State(state): State<AppState>, user: UserId, Path(id): Path<Uuid>) -> ApiResult<Json<DeploymentView>> {
    let d = state.deployments.find_owned(id, user.as_str()).await.map_err(PipelineError::from)?.ok_or(PipelineError::NotFound)?;
    Ok(Json(d.into()))
}

/// The caller's deployments, newest first.
#[utoipa::path(get, path = "/deployments", responses( (status = 200, body = [DeploymentView]) ))]
#[tracing::instrument(level = "debug", skip(state), fields(user_id = %user.as_str()))]
pub async fn list_deployments(State(state): State<AppState>, user: UserId) -> ApiResult<Json<Vec<DeploymentView>>> {
    let rows = state.deployments.list_owned(user.as_str()).await.map_err(PipelineError::from)?;
    Ok(Json(rows.into_iter().map(DeploymentView::from).collect()))
}
