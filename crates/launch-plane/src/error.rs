use axum::{response::{IntoResponse, Response}, Json, http::StatusCode};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use std::fmt::{Display, Formatter};

pub const ACTION_INSTALL_INTEGRATION: &str = "install_integration";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
    #[serde(rename = "installUrl", skip_serializing_if = "Option::is_none")]
    pub install_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiError { pub status: StatusCode, pub code: &'static str, pub message: String, pub action: Option<&'static str>, pub install_url: Option<String> }

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into(), action: None, install_url: None }
    }
    pub fn not_found(msg: impl Into<String>) -> Self { Self::new(StatusCode::NOT_FOUND, "not_found", msg) }
    pub fn conflict(msg: impl Into<String>) -> Self { Self::new(StatusCode::CONFLICT, "conflict", msg) }
    pub fn internal(msg: impl Into<String>) -> Self { Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg) }
    pub fn bad_request(msg: impl Into<String>) -> Self { Self::new(StatusCode::BAD_REQUEST, "bad_request", msg) }
    pub fn unauthorized(msg: impl Into<String>) -> Self { Self::new(StatusCode::UNAUTHORIZED, "unauthorized", msg) }
    pub fn with_action(mut self, action: &'static str, install_url: impl Into<String>) -> Self {
        self.action = Some(action); self.install_url = Some(install_url.into()); self
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}: {}", self.code, self.message) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody { code: self.code, error: self.message, action: self.action, install_url: self.install_url };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Failures of the record store or the staging area.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Outcome taxonomy of intake and run, surfaced at the HTTP boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    QuotaExceeded(String),
    #[error("Deployment not found")]
    NotFound,
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("{0}")]
    UploadExpired(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Provider(String),
    /// Database integration missing on the hosting account; the user can fix it with one click.
    #[error("{message}")]
    InstallIntegration { message: String, install_url: String, integration: String },
    #[error("{0}")]
    Internal(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::NotFound => "not_found",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::UploadExpired(_) => "upload_expired",
            Self::Conflict(_) => "conflict",
            Self::Provider(_) => "provider_error",
            Self::InstallIntegration { .. } => "install_integration",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::PreconditionFailed(_) | Self::UploadExpired(_) | Self::InstallIntegration { .. } => StatusCode::BAD_REQUEST,
            Self::QuotaExceeded(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Provider(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self { Self::Internal(e.to_string()) }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = e.status();
        let code = e.code();
        match e {
            PipelineError::InstallIntegration { message, install_url, .. } =>
                ApiError::new(status, code, message).with_action(ACTION_INSTALL_INTEGRATION, install_url),
            other => ApiError::new(status, code, other.to_string()),
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response { ApiError::from(self).into_response() }
}
