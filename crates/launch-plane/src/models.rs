use serde::{Serialize, Deserialize};
use utoipa::ToSchema;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use crate::analysis::{AnalysisMetadata, Framework};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus { Pending, Building, Ready, Failed }

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self { Self::Pending => "pending", Self::Building => "building", Self::Ready => "ready", Self::Failed => "failed" }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s { "pending" => Some(Self::Pending), "building" => Some(Self::Building), "ready" => Some(Self::Ready), "failed" => Some(Self::Failed), _ => None }
    }

    pub const ALL: [Self; 4] = [Self::Pending, Self::Building, Self::Ready, Self::Failed];

    /// `pending → building → {ready | failed}`, plus `failed → building` on retry.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!((self, next),
            (Self::Pending, Self::Building) | (Self::Failed, Self::Building) |
            (Self::Building, Self::Ready) | (Self::Building, Self::Failed))
    }

    /// Statuses a record may hold when moving to `next`; the guard for compare-and-set writes.
    pub fn sources_of(next: Self) -> Vec<Self> {
        Self::ALL.into_iter().filter(|s| s.can_transition_to(next)).collect()
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// One attempt to publish one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub framework: Framework,
    pub status: DeploymentStatus,
    pub repo_url: Option<String>,
    pub hosting_project_id: Option<String>,
    pub hosting_deployment_id: Option<String>,
    pub live_url: Option<String>,
    pub error_message: Option<String>,
    pub analysis: AnalysisMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub user_id: String,
    pub name: String,
    pub framework: Framework,
    pub analysis: AnalysisMetadata,
}

impl NewDeployment {
    pub fn into_deployment(self, id: Uuid, created_at: DateTime<Utc>) -> Deployment {
        Deployment {
            id, user_id: self.user_id, name: self.name, framework: self.framework,
            status: DeploymentStatus::Pending,
            repo_url: None, hosting_project_id: None, hosting_deployment_id: None, live_url: None, error_message: None,
            analysis: self.analysis, created_at,
        }
    }
}

/// Partial update. Outer `None` leaves a column untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentPatch {
    pub status: Option<DeploymentStatus>,
    pub repo_url: Option<Option<String>>,
    pub hosting_project_id: Option<Option<String>>,
    pub hosting_deployment_id: Option<Option<String>>,
    pub live_url: Option<Option<String>>,
    pub error_message: Option<Option<String>>,
}

impl DeploymentPatch {
    /// Start of an attempt: clears the previous error (and any stale live URL).
    pub fn building() -> Self {
        Self { status: Some(DeploymentStatus::Building), error_message: Some(None), live_url: Some(None), ..Default::default() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { status: Some(DeploymentStatus::Failed), error_message: Some(Some(message.into())), live_url: Some(None), ..Default::default() }
    }

    pub fn ready(live_url: String, hosting_project_id: String, hosting_deployment_id: Option<String>) -> Self {
        Self {
            status: Some(DeploymentStatus::Ready),
            live_url: Some(Some(live_url)),
            hosting_project_id: Some(Some(hosting_project_id)),
            hosting_deployment_id: Some(hosting_deployment_id),
            error_message: Some(None),
            ..Default::default()
        }
    }

    pub fn repository(url: impl Into<String>) -> Self { Self { repo_url: Some(Some(url.into())), ..Default::default() } }

    pub fn with_hosting_project(mut self, id: impl Into<String>) -> Self { self.hosting_project_id = Some(Some(id.into())); self }

    pub fn is_empty(&self) -> bool { *self == Self::default() }

    pub fn apply(&self, d: &mut Deployment) {
        if let Some(s) = self.status { d.status = s; }
        if let Some(v) = &self.repo_url { d.repo_url = v.clone(); }
        if let Some(v) = &self.hosting_project_id { d.hosting_project_id = v.clone(); }
        if let Some(v) = &self.hosting_deployment_id { d.hosting_deployment_id = v.clone(); }
        if let Some(v) = &self.live_url { d.live_url = v.clone(); }
        if let Some(v) = &self.error_message { d.error_message = v.clone(); }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider { Github, Vercel }

impl Provider {
    pub fn as_str(self) -> &'static str { match self { Self::Github => "github", Self::Vercel => "vercel" } }
    pub fn parse(s: &str) -> Option<Self> { match s { "github" => Some(Self::Github), "vercel" => Some(Self::Vercel), _ => None } }
}

/// A delegated bearer token for one (user, provider) pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn bearer(user_id: impl Into<String>, provider: Provider, token: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), provider, access_token: token.into(), refresh_token: None, expires_at: None }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("user_id", &self.user_id).field("provider", &self.provider)
            .field("has_refresh_token", &self.refresh_token.is_some()).field("expires_at", &self.expires_at).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Deployment {
        NewDeployment { user_id: "u1".into(), name: "app".into(), framework: Framework::Static, analysis: AnalysisMetadata::default() }
            .into_deployment(Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn transitions() {
        use DeploymentStatus::*;
        assert!(Pending.can_transition_to(Building));
        assert!(Failed.can_transition_to(Building));
        assert!(Building.can_transition_to(Ready));
        assert!(Building.can_transition_to(Failed));
        assert!(!Ready.can_transition_to(Building));
        assert!(!Pending.can_transition_to(Ready));
        assert!(!Building.can_transition_to(Building));
    }

    #[test]
    fn sources_follow_the_transition_table() {
        use DeploymentStatus::*;
        assert_eq!(DeploymentStatus::sources_of(Building), vec![Pending, Failed]);
        assert_eq!(DeploymentStatus::sources_of(Ready), vec![Building]);
        assert_eq!(DeploymentStatus::sources_of(Failed), vec![Building]);
        assert!(DeploymentStatus::sources_of(Pending).is_empty());
    }

    #[test]
    fn status_strings_round_trip() {
        for s in ["pending", "building", "ready", "failed"] { assert_eq!(DeploymentStatus::parse(s).unwrap().as_str(), s); }
        assert!(DeploymentStatus::parse("running").is_none());
    }

    #[test]
    fn building_clears_previous_error() {
        let mut d = sample();
        DeploymentPatch::failed("boom").apply(&mut d);
        assert_eq!(d.error_message.as_deref(), Some("boom"));
        DeploymentPatch::building().apply(&mut d);
        assert_eq!(d.status, DeploymentStatus::Building);
        assert!(d.error_message.is_none());
    }

    #[test]
    fn ready_sets_live_url_and_ids() {
        let mut d = sample();
        DeploymentPatch::building().apply(&mut d);
        DeploymentPatch::ready("https://x.vercel.app".into(), "prj_1".into(), Some("dpl_1".into())).apply(&mut d);
        assert_eq!(d.live_url.as_deref(), Some("https://x.vercel.app"));
        assert_eq!(d.hosting_project_id.as_deref(), Some("prj_1"));
        assert!(d.error_message.is_none());
    }

    #[test]
    fn credential_debug_hides_tokens() {
        let c = Credential::bearer("u1", Provider::Github, "ghp_secret");
        assert!(!format!("{c:?}").contains("ghp_secret"));
    }
}
