use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use crate::{
    analysis::{analyze_bytes, sanitize_name, AnalysisSummary},
    archive::{find_manifest, ArchiveError, ZipSource},
    error::PipelineError,
    models::{DeploymentStatus, NewDeployment},
    services::deployments::DeploymentStore,
    storage::StagingBackend,
    telemetry::{INTAKE_ARCHIVES, INTAKE_ARCHIVE_BYTES},
};

pub const MISSING_INPUT: &str = "Missing file or project name";
pub const QUOTA_AT_INTAKE: &str = "Free tier limit reached. Upgrade to Pro for unlimited deployments.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntakeReceipt {
    pub deployment_id: Uuid,
    pub analysis: AnalysisSummary,
}

/// Accepts uploaded archives: quota check, analysis, record creation, staging.
#[derive(Clone)]
pub struct ArchiveIntake {
    deployments: Arc<dyn DeploymentStore>,
    staging: Arc<dyn StagingBackend>,
    free_tier_limit: i64,
}

impl ArchiveIntake {
    pub fn new(deployments: Arc<dyn DeploymentStore>, staging: Arc<dyn StagingBackend>, free_tier_limit: i64) -> Self {
        Self { deployments, staging, free_tier_limit }
    }

    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn accept(&self, bytes: Vec<u8>, name: &str, user_id: &str) -> Result<IntakeReceipt, PipelineError> {
        let name = name.trim();
        if bytes.is_empty() || name.is_empty() {
            return Err(PipelineError::Validation(MISSING_INPUT.into()));
        }
        let live = self.deployments.count(user_id, DeploymentStatus::Ready).await?;
        if live >= self.free_tier_limit {
            info!(event = "intake.quota_exceeded", user_id, live);
            return Err(PipelineError::QuotaExceeded(QUOTA_AT_INTAKE.into()));
        }
        let analysis = analyze_bytes(read_manifest(&bytes)?.as_deref());
        let size = bytes.len() as u64;
        let deployment = self.deployments.create(NewDeployment {
            user_id: user_id.to_string(),
            name: sanitize_name(name),
            framework: analysis.framework,
            analysis: analysis.metadata(),
        }).await?;
        self.staging.put(deployment.id, bytes).await?;
        INTAKE_ARCHIVES.inc();
        INTAKE_ARCHIVE_BYTES.inc_by(size);
        info!(event = "intake.accepted", deployment_id = %deployment.id, name = %deployment.name, framework = analysis.framework.as_str(), database = analysis.database.kind.as_str());
        Ok(IntakeReceipt { deployment_id: deployment.id, analysis: analysis.summary() })
    }
}

/// Manifest bytes, if the archive has one. An unreadable archive is a validation error;
/// a single unreadable manifest entry is not.
fn read_manifest(bytes: &[u8]) -> Result<Option<Vec<u8>>, PipelineError> {
    let mut source = ZipSource::open(bytes.to_vec()).map_err(|e| {
        warn!(event = "intake.archive_unreadable", error = %e);
        PipelineError::Validation("Uploaded file is not a valid zip archive".into())
    })?;
    match find_manifest(&mut source) {
        Ok(m) => Ok(m),
        Err(ArchiveError::Unreadable(e)) => Err(PipelineError::Validation(format!("Uploaded file is not a valid zip archive: {e}"))),
        Err(e) => { warn!(event = "intake.manifest_unreadable", error = %e); Ok(None) }
    }
}
