use axum::{Json, extract::{Multipart, State}};
use tracing::warn;
use crate::{AppState, auth::UserId, error::{ApiResult, PipelineError}, services::intake::{IntakeReceipt, MISSING_INPUT}};

/// Multipart fields the intake form sends.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    pub name: String,
}

/// Upload a zipped project (multipart: `file`, `name`). Analyzes it and stages it for a run.
#[utoipa::path(post, path = "/deployments/upload", request_body(content = UploadForm, content_type = "multipart/form-data"), responses(
    (status = 200, body = IntakeReceipt),
    (status = 400, body = crate::error::ApiErrorBody, description = "missing file or name, or not a zip archive"),
    (status = 401, body = crate::error::ApiErrorBody),
    (status = 403, body = crate::error::ApiErrorBody, description = "free tier limit reached"),
))]
#[tracing::instrument(level = "info", skip(state, multipart), fields(user_id = %user.as_str()))]
pub async fn upload_project(State(state): State<AppState>, user: UserId, mut multipart: Multipart) -> ApiResult<Json<IntakeReceipt>> {
    let mut file: Option<Vec<u8>> = None;
    let mut name: Option<String> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                warn!(event = "upload.multipart_error", error = %e);
                return Err(PipelineError::Validation(format!("invalid multipart body: {e}")).into());
            }
        };
        match field.name() {
            Some("file") => {
                let bytes = field.bytes().await.map_err(|e| PipelineError::Validation(format!("failed to read file: {e}")))?;
                file = Some(bytes.to_vec());
            }
            Some("name") => {
                name = Some(field.text().await.map_err(|e| PipelineError::Validation(format!("failed to read name: {e}")))?);
            }
            _ => {}
        }
    }
    let (Some(file), Some(name)) = (file, name) else {
        return Err(PipelineError::Validation(MISSING_INPUT.into()).into());
    };
    let receipt = state.intake.accept(file, &name, user.as_str()).await?;
    Ok(Json(receipt))
}
