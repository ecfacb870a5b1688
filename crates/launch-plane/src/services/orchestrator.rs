//! Drives one deployment through repository creation, file upload, hosting
//! project creation, optional database provisioning and deployment trigger.
//!
//! Each step yields `Result<T, StepError>`. Fatal errors end the attempt and
//! mark the record `failed`; non-fatal ones are logged by [`settle`] and the
//! pipeline moves on.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use crate::{
    analysis::Framework,
    archive::{collect_files, ProjectFile, UnpackOptions, Unpacked, ZipSource},
    clients::{HostingPlatform, HostingProject, ProjectDeployment, Repository, SourceControl},
    config::PipelineSettings,
    error::PipelineError,
    models::{Deployment, DeploymentPatch, DeploymentStatus},
    services::{credentials::{hosting_token, source_control_token, CredentialStore}, deployments::DeploymentStore, provision::{DatabaseProvisioner, ProvisionOutcome}},
    storage::{StagingBackend, DEFAULT_STAGING_DIR},
    telemetry::{FILE_PUSH_FAILURES, PIPELINE_RUNS},
};

pub const CONNECT_GITHUB: &str = "Connect GitHub first";
pub const CONNECT_VERCEL: &str = "Connect Vercel first";
pub const QUOTA_AT_RUN: &str = "Free tier limit reached";
pub const UPLOAD_EXPIRED: &str = "Upload expired. Please upload again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity { Fatal, NonFatal }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step { LoadArchive, Unpack, CreateRepository, RecordRepository, PushFile, CreateProject, ProvisionDatabase, TriggerDeployment, Finalize }

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::LoadArchive => "load_archive",
            Step::Unpack => "unpack",
            Step::CreateRepository => "create_repository",
            Step::RecordRepository => "record_repository",
            Step::PushFile => "push_file",
            Step::CreateProject => "create_project",
            Step::ProvisionDatabase => "provision_database",
            Step::TriggerDeployment => "trigger_deployment",
            Step::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{step}: {error}")]
pub struct StepError {
    pub step: Step,
    pub severity: Severity,
    pub error: PipelineError,
}

impl StepError {
    pub fn fatal(step: Step, error: PipelineError) -> Self { Self { step, severity: Severity::Fatal, error } }
    pub fn non_fatal(step: Step, error: PipelineError) -> Self { Self { step, severity: Severity::NonFatal, error } }
}

pub type StepResult<T> = Result<T, StepError>;

/// Swallow a non-fatal failure (logged, `Ok(None)`); fatal ones pass through.
pub fn settle<T>(result: StepResult<T>) -> StepResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.severity == Severity::NonFatal => {
            warn!(event = "pipeline.step_skipped", step = e.step.as_str(), error = %e.error);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub success: bool,
    pub live_url: String,
    pub repo_url: String,
}

/// What the attempt learned before failing; persisted alongside the failure.
#[derive(Debug, Default)]
struct Progress { hosting_project_id: Option<String> }

#[derive(Clone)]
pub struct Orchestrator {
    deployments: Arc<dyn DeploymentStore>,
    credentials: Arc<dyn CredentialStore>,
    staging: Arc<dyn StagingBackend>,
    source_control: Arc<dyn SourceControl>,
    hosting: Arc<dyn HostingPlatform>,
    provisioner: DatabaseProvisioner,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        credentials: Arc<dyn CredentialStore>,
        staging: Arc<dyn StagingBackend>,
        source_control: Arc<dyn SourceControl>,
        hosting: Arc<dyn HostingPlatform>,
        settings: PipelineSettings,
    ) -> Self {
        let provisioner = DatabaseProvisioner::new(hosting.clone(), &settings);
        Self { deployments, credentials, staging, source_control, hosting, provisioner, settings }
    }

    /// Run (or retry) the pipeline for one owned deployment.
    #[instrument(skip(self), fields(deployment_id = %id))]
    pub async fn run(&self, id: Uuid, user_id: &str) -> Result<RunOutcome, PipelineError> {
        let (deployment, github, vercel) = match self.admit(id, user_id).await {
            Ok(admitted) => admitted,
            Err(e) => {
                PIPELINE_RUNS.with_label_values(&["rejected"]).inc();
                info!(event = "pipeline.rejected", code = e.code(), error = %e);
                return Err(e);
            }
        };
        info!(event = "pipeline.started", name = %deployment.name, retry = deployment.status == DeploymentStatus::Failed);

        let mut progress = Progress::default();
        match self.attempt(&deployment, &github, &vercel, &mut progress).await {
            Ok(outcome) => {
                PIPELINE_RUNS.with_label_values(&["ready"]).inc();
                info!(event = "pipeline.ready", live_url = %outcome.live_url, repo_url = %outcome.repo_url);
                Ok(outcome)
            }
            Err(e) => {
                let label = match &e.error {
                    PipelineError::InstallIntegration { .. } => "install_integration",
                    PipelineError::UploadExpired(_) => "upload_expired",
                    _ => "failed",
                };
                PIPELINE_RUNS.with_label_values(&[label]).inc();
                warn!(event = "pipeline.failed", step = e.step.as_str(), error = %e.error);
                self.record_failure(id, &e.error, progress).await;
                Err(e.error)
            }
        }
    }

    /// Ownership, credentials, quota, then the `pending|failed -> building` compare-and-set.
    /// Nothing is mutated unless every check passes.
    async fn admit(&self, id: Uuid, user_id: &str) -> Result<(Deployment, String, String), PipelineError> {
        let deployment = self.deployments.find_owned(id, user_id).await?.ok_or(PipelineError::NotFound)?;
        let (github, vercel) = tokio::join!(
            source_control_token(self.credentials.as_ref(), user_id),
            hosting_token(self.credentials.as_ref(), user_id),
        );
        let github = github?.ok_or_else(|| PipelineError::PreconditionFailed(CONNECT_GITHUB.into()))?;
        let vercel = vercel?.ok_or_else(|| PipelineError::PreconditionFailed(CONNECT_VERCEL.into()))?;
        self.check_quota(user_id).await?;
        let restartable = DeploymentStatus::sources_of(DeploymentStatus::Building);
        if !self.deployments.transition(id, &restartable, &DeploymentPatch::building()).await? {
            // Lost the race to another run if the status we read was still restartable.
            let current = if restartable.contains(&deployment.status) { DeploymentStatus::Building } else { deployment.status };
            return Err(PipelineError::Conflict(format!("Deployment is already {current}")));
        }
        Ok((deployment, github, vercel))
    }

    async fn check_quota(&self, user_id: &str) -> Result<(), PipelineError> {
        let live = self.deployments.count(user_id, DeploymentStatus::Ready).await?;
        if live >= self.settings.free_tier_limit {
            return Err(PipelineError::QuotaExceeded(QUOTA_AT_RUN.into()));
        }
        Ok(())
    }

    async fn attempt(&self, deployment: &Deployment, github: &str, vercel: &str, progress: &mut Progress) -> StepResult<RunOutcome> {
        let files = self.load_files(deployment.id).await?;

        let repo = self.source_control.create_repository(github, &deployment.name, &self.settings.repo_description).await
            .map_err(|e| StepError::fatal(Step::CreateRepository, PipelineError::Provider(e.message)))?;
        let repo_url = repo.web_url();
        info!(event = "pipeline.repo.created", repo = %repo.full_name);
        self.deployments.update(deployment.id, &DeploymentPatch::repository(&repo_url)).await
            .map_err(|e| StepError::fatal(Step::RecordRepository, e.into()))?;

        self.push_files(github, &repo, &files).await?;

        let project = self.create_project(vercel, deployment, &repo).await?;
        progress.hosting_project_id = Some(project.id.clone());

        if !deployment.analysis.database.kind.is_none() {
            settle(self.provision(vercel, deployment, &project).await)?;
        }

        let triggered = self.hosting.create_deployment(vercel, &deployment.name, &project, &self.settings.branch).await
            .map_err(|e| StepError::fatal(Step::TriggerDeployment, PipelineError::Provider(e.message)))?;
        let live_url = self.live_url(&triggered, &deployment.name);
        let ready = DeploymentPatch::ready(live_url.clone(), project.id.clone(), triggered.id.clone());
        let moved = self.deployments.transition(deployment.id, &DeploymentStatus::sources_of(DeploymentStatus::Ready), &ready).await
            .map_err(|e| StepError::fatal(Step::Finalize, e.into()))?;
        if !moved {
            return Err(StepError::fatal(Step::Finalize, PipelineError::Conflict("Deployment is no longer building".into())));
        }
        Ok(RunOutcome { success: true, live_url, repo_url })
    }

    async fn load_files(&self, id: Uuid) -> StepResult<Vec<ProjectFile>> {
        let bytes = self.staging.get(id).await
            .map_err(|e| StepError::fatal(Step::LoadArchive, e.into()))?
            .ok_or_else(|| StepError::fatal(Step::LoadArchive, PipelineError::UploadExpired(UPLOAD_EXPIRED.into())))?;
        let staging_dir = self.staging.dir_name().unwrap_or_else(|| DEFAULT_STAGING_DIR.to_string());
        let opts = UnpackOptions::new(&staging_dir, self.settings.strip_root_folder).with_max_files(self.settings.max_files);
        let unpack = |bytes: Vec<u8>| -> Result<Unpacked, crate::archive::ArchiveError> {
            let mut source = ZipSource::open(bytes)?;
            collect_files(&mut source, &opts)
        };
        let unpacked = unpack(bytes)
            .map_err(|e| StepError::fatal(Step::Unpack, PipelineError::Internal(format!("Uploaded archive could not be read: {e}"))))?;
        if unpacked.total > unpacked.files.len() {
            warn!(event = "pipeline.files.capped", total = unpacked.total, cap = self.settings.max_files);
        }
        info!(event = "pipeline.archive.unpacked", files = unpacked.files.len());
        Ok(unpacked.files)
    }

    /// Sequential, best-effort: each file is its own non-fatal step.
    async fn push_files(&self, token: &str, repo: &Repository, files: &[ProjectFile]) -> StepResult<()> {
        let mut pushed = 0usize;
        let mut failed = 0usize;
        for file in files {
            let put = self.source_control.put_file(token, repo, &file.path, &file.contents, &self.settings.branch).await
                .map_err(|e| StepError::non_fatal(Step::PushFile, PipelineError::Provider(format!("{}: {}", file.path, e.message))));
            match settle(put)? {
                Some(()) => pushed += 1,
                None => {
                    failed += 1;
                    FILE_PUSH_FAILURES.inc();
                }
            }
        }
        info!(event = "pipeline.files.pushed", pushed, failed);
        Ok(())
    }

    async fn create_project(&self, token: &str, deployment: &Deployment, repo: &Repository) -> StepResult<HostingProject> {
        let framework = (deployment.framework == Framework::Nextjs).then_some(Framework::Nextjs.as_str());
        let project = self.hosting.create_project(token, &deployment.name, framework, &repo.full_name).await
            .map_err(|e| StepError::fatal(Step::CreateProject, PipelineError::Provider(e.message)))?;
        info!(event = "pipeline.project.created", project_id = %project.id);
        Ok(project)
    }

    async fn provision(&self, token: &str, deployment: &Deployment, project: &HostingProject) -> StepResult<()> {
        let kind = deployment.analysis.database.kind;
        match self.provisioner.provision(kind, token, &deployment.name, &project.id).await {
            Some(ProvisionOutcome::Provisioned { .. }) => {
                info!(event = "pipeline.database.provisioned", kind = kind.as_str());
                Ok(())
            }
            Some(ProvisionOutcome::NeedsIntegration { integration_slug, install_url, message }) => Err(StepError::fatal(
                Step::ProvisionDatabase,
                PipelineError::InstallIntegration { message, install_url, integration: integration_slug },
            )),
            None => Err(StepError::non_fatal(
                Step::ProvisionDatabase,
                PipelineError::Provider(format!("{} database was not provisioned", kind.as_str())),
            )),
        }
    }

    fn live_url(&self, triggered: &ProjectDeployment, name: &str) -> String {
        triggered.live_url(name, &self.settings.fallback_domain)
    }

    /// Best effort: a failure to record the failure is only logged.
    /// Only a `building` record is moved to `failed`.
    async fn record_failure(&self, id: Uuid, error: &PipelineError, progress: Progress) {
        let mut patch = DeploymentPatch::failed(error.to_string());
        if let Some(project_id) = progress.hosting_project_id { patch = patch.with_hosting_project(project_id); }
        match self.deployments.transition(id, &DeploymentStatus::sources_of(DeploymentStatus::Failed), &patch).await {
            Ok(true) => {}
            Ok(false) => warn!(event = "pipeline.record_failure_skipped", "deployment is no longer building"),
            Err(e) => warn!(event = "pipeline.record_failure_failed", error = %e),
        }
    }
}
