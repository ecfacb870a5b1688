pub mod analysis;
pub mod archive;
pub mod auth;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod services;
pub mod storage;
pub mod telemetry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

use std::sync::Arc;
use axum::{Router, extract::DefaultBodyLimit, middleware, routing::{get, post}};
use tracing::info;
use utoipa::OpenApi;
use crate::{
    clients::{http_client, GithubClient, HostingPlatform, SourceControl, VercelClient},
    config::{Settings, StoreMode},
    services::{
        credentials::{CredentialStore, PgCredentialStore, VercelOAuth},
        deployments::{DeploymentStore, PgDeploymentStore},
        intake::ArchiveIntake,
        memory::MemoryStore,
        orchestrator::Orchestrator,
    },
    storage::{staging_from_settings, StagingBackend},
    telemetry::{metrics_handler, track_metrics},
};

/// Everything the pipeline talks to, constructed once at boot.
#[derive(Clone)]
pub struct Collaborators {
    pub deployments: Arc<dyn DeploymentStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub staging: Arc<dyn StagingBackend>,
    pub source_control: Arc<dyn SourceControl>,
    pub hosting: Arc<dyn HostingPlatform>,
}

#[derive(Clone)]
pub struct AppState {
    pub deployments: Arc<dyn DeploymentStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub intake: ArchiveIntake,
    pub orchestrator: Orchestrator,
    pub vercel_oauth: Option<VercelOAuth>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(c: Collaborators, settings: &Settings, vercel_oauth: Option<VercelOAuth>) -> Self {
        let intake = ArchiveIntake::new(c.deployments.clone(), c.staging.clone(), settings.pipeline.free_tier_limit);
        let orchestrator = Orchestrator::new(
            c.deployments.clone(),
            c.credentials.clone(),
            c.staging,
            c.source_control,
            c.hosting,
            settings.pipeline.clone(),
        );
        Self { deployments: c.deployments, credentials: c.credentials, intake, orchestrator, vercel_oauth, max_upload_bytes: settings.max_upload_bytes }
    }

    /// Build stores, staging and provider clients from configuration.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let (deployments, credentials): (Arc<dyn DeploymentStore>, Arc<dyn CredentialStore>) = match settings.store_mode {
            StoreMode::Postgres => {
                let url = settings.database_url.as_deref().ok_or(config::ConfigError::Missing("DATABASE_URL"))?;
                let pool = db::init_db(url).await?;
                (Arc::new(PgDeploymentStore::new(pool.clone())), Arc::new(PgCredentialStore::new(pool)))
            }
            StoreMode::Memory => {
                let store = MemoryStore::new();
                (Arc::new(store.clone()), Arc::new(store))
            }
        };
        let staging = staging_from_settings(&settings.staging).await;
        let http = http_client(settings.http_timeout())?;
        let vercel = VercelClient::new(http.clone(), settings.vercel_api.clone());
        let vercel_oauth = settings.vercel_oauth().map(|(id, secret)| VercelOAuth::new(vercel.clone(), id, secret));
        info!(event = "state.init", store_mode = ?settings.store_mode, oauth = vercel_oauth.is_some());
        let collaborators = Collaborators {
            deployments,
            credentials,
            staging,
            source_control: Arc::new(GithubClient::new(http, settings.github_api.clone())),
            hosting: Arc::new(vercel),
        };
        Ok(Self::new(collaborators, settings, vercel_oauth))
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::readiness::readiness,
        handlers::uploads::upload_project,
        handlers::deployments::run_deployment,
        handlers::deployments::get_deployment,
        handlers::deployments::list_deployments,
        handlers::connections::get_connections,
        handlers::connections::connect_github,
        handlers::connections::connect_vercel,
        handlers::connections::connect_vercel_oauth,
    ),
    components(schemas(
        error::ApiErrorBody,
        handlers::health::HealthResponse,
        handlers::readiness::ReadinessResponse,
        handlers::uploads::UploadForm,
        handlers::deployments::DeploymentView,
        handlers::connections::ConnectionsResponse,
        handlers::connections::TokenRequest,
        handlers::connections::OAuthCodeRequest,
        handlers::connections::ConnectResponse,
        services::intake::IntakeReceipt,
        services::orchestrator::RunOutcome,
        analysis::Framework,
        analysis::DatabaseKind,
        analysis::DatabaseNeed,
        analysis::PaymentGateway,
        analysis::AnalysisMetadata,
        analysis::AnalysisSummary,
        models::DeploymentStatus,
    )),
    tags( (name = "launch-plane", description = "Project upload and deployment pipeline API") )
)]
pub struct ApiDoc;

pub fn build_router(state: AppState) -> Router {
    let openapi = ApiDoc::openapi();
    let max_upload = state.max_upload_bytes;
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/readyz", get(handlers::readiness::readiness))
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(move || { let doc = openapi.clone(); async move { axum::Json(doc) } }))
        .route("/deployments", get(handlers::deployments::list_deployments))
        .route("/deployments/upload", post(handlers::uploads::upload_project))
        .route("/deployments/:id", get(handlers::deployments::get_deployment))
        .route("/deployments/:id/run", post(handlers::deployments::run_deployment))
        .route("/connections", get(handlers::connections::get_connections))
        .route("/connect/github", post(handlers::connections::connect_github))
        .route("/connect/vercel", post(handlers::connections::connect_vercel))
        .route("/connect/vercel/oauth", post(handlers::connections::connect_vercel_oauth))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}
