use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, Pool, Postgres, QueryBuilder};
use tracing::warn;
use uuid::Uuid;
use crate::{analysis::{AnalysisMetadata, Framework}, error::StoreError, models::{Deployment, DeploymentPatch, DeploymentStatus, NewDeployment}};

/// Persistence for deployment records. No business rules live here.
#[async_trait]
pub trait DeploymentStore: Send + Sync + 'static {
    async fn create(&self, new: NewDeployment) -> Result<Deployment, StoreError>;
    async fn find_owned(&self, id: Uuid, user_id: &str) -> Result<Option<Deployment>, StoreError>;
    async fn update(&self, id: Uuid, patch: &DeploymentPatch) -> Result<(), StoreError>;
    /// Apply `patch` only if the current status is one of `from`. Returns whether it was applied.
    async fn transition(&self, id: Uuid, from: &[DeploymentStatus], patch: &DeploymentPatch) -> Result<bool, StoreError>;
    async fn count(&self, user_id: &str, status: DeploymentStatus) -> Result<i64, StoreError>;
    /// Newest first.
    async fn list_owned(&self, user_id: &str) -> Result<Vec<Deployment>, StoreError>;
    async fn ping(&self) -> Result<(), StoreError> { Ok(()) }
}

const COLUMNS: &str = "id, user_id, name, framework, status, repo_url, hosting_project_id, hosting_deployment_id, live_url, error_message, analysis, created_at";

#[derive(Debug, FromRow)]
struct DeploymentRow {
    id: Uuid,
    user_id: String,
    name: String,
    framework: String,
    status: String,
    repo_url: Option<String>,
    hosting_project_id: Option<String>,
    hosting_deployment_id: Option<String>,
    live_url: Option<String>,
    error_message: Option<String>,
    analysis: Json<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = StoreError;
    fn try_from(r: DeploymentRow) -> Result<Self, StoreError> {
        let status = DeploymentStatus::parse(&r.status).ok_or_else(|| StoreError::Corrupt(format!("deployment {} has status {:?}", r.id, r.status)))?;
        // Older rows may carry partial metadata; missing fields take their defaults.
        let analysis = serde_json::from_value::<AnalysisMetadata>(r.analysis.0).unwrap_or_else(|e| {
            warn!(event = "store.analysis_decode_failed", deployment_id = %r.id, error = %e);
            AnalysisMetadata::default()
        });
        Ok(Deployment {
            id: r.id,
            user_id: r.user_id,
            name: r.name,
            framework: Framework::from_tag(&r.framework),
            status,
            repo_url: r.repo_url,
            hosting_project_id: r.hosting_project_id,
            hosting_deployment_id: r.hosting_deployment_id,
            live_url: r.live_url,
            error_message: r.error_message,
            analysis,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgDeploymentStore { pool: Pool<Postgres> }

impl PgDeploymentStore {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
}

fn push_patch(qb: &mut QueryBuilder<'static, Postgres>, patch: &DeploymentPatch) {
    let mut set = qb.separated(", ");
    set.push("updated_at = NOW()");
    if let Some(s) = patch.status { set.push("status = "); set.push_bind_unseparated(s.as_str()); }
    let columns: [(&str, &Option<Option<String>>); 5] = [
        ("repo_url", &patch.repo_url),
        ("hosting_project_id", &patch.hosting_project_id),
        ("hosting_deployment_id", &patch.hosting_deployment_id),
        ("live_url", &patch.live_url),
        ("error_message", &patch.error_message),
    ];
    for (column, value) in columns {
        if let Some(v) = value {
            set.push(format!("{column} = "));
            set.push_bind_unseparated(v.clone());
        }
    }
}

#[async_trait]
impl DeploymentStore for PgDeploymentStore {
    async fn create(&self, new: NewDeployment) -> Result<Deployment, StoreError> {
        let row = sqlx::query_as::<_, DeploymentRow>(&format!(
            "INSERT INTO deployments (id, user_id, name, framework, status, analysis) VALUES ($1,$2,$3,$4,'pending',$5) RETURNING {COLUMNS}"))
            .bind(Uuid::new_v4())
            .bind(&new.user_id)
            .bind(&new.name)
            .bind(new.framework.as_str())
            .bind(Json(&new.analysis))
            .fetch_one(&self.pool).await?;
        row.try_into()
    }

    async fn find_owned(&self, id: Uuid, user_id: &str) -> Result<Option<Deployment>, StoreError> {
        let row = sqlx::query_as::<_, DeploymentRow>(&format!("SELECT {COLUMNS} FROM deployments WHERE id = $1 AND user_id = $2"))
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool).await?;
        row.map(Deployment::try_from).transpose()
    }

    async fn update(&self, id: Uuid, patch: &DeploymentPatch) -> Result<(), StoreError> {
        if patch.is_empty() { return Ok(()); }
        let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new("UPDATE deployments SET ");
        push_patch(&mut qb, patch);
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn transition(&self, id: Uuid, from: &[DeploymentStatus], patch: &DeploymentPatch) -> Result<bool, StoreError> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new("UPDATE deployments SET ");
        push_patch(&mut qb, patch);
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" AND status = ANY(").push_bind(from).push(")");
        let res = qb.build().execute(&self.pool).await?;
        Ok(res.rows_affected() == 1)
    }

    async fn count(&self, user_id: &str, status: DeploymentStatus) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deployments WHERE user_id = $1 AND status = $2")
            .bind(user_id)
            .bind(status.as_str())
            .fetch_one(&self.pool).await?;
        Ok(n)
    }

    async fn list_owned(&self, user_id: &str) -> Result<Vec<Deployment>, StoreError> {
        let rows = sqlx::query_as::<_, DeploymentRow>(&format!("SELECT {COLUMNS} FROM deployments WHERE user_id = $1 ORDER BY created_at DESC"))
            .bind(user_id)
            .fetch_all(&self.pool).await?;
        rows.into_iter().map(Deployment::try_from).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
