use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use super::{decode, join, send_json, ProviderError};

pub const DEFAULT_API_BASE: &str = "https://api.vercel.com";
pub const PROJECT_CREATE_HINT: &str = "Failed to create Vercel project. Ensure Vercel is connected to GitHub at vercel.com/account/integrations";
pub const STORE_ENVIRONMENTS: [&str; 3] = ["production", "preview", "development"];

/// Git repository id as the platform reports it (numeric for GitHub links).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepoId { Number(i64), Text(String) }

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct ProjectLink {
    #[serde(rename = "repoId", default)]
    repo_id: Option<RepoId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostingProject {
    pub id: String,
    #[serde(default)]
    link: Option<ProjectLink>,
}

impl HostingProject {
    pub fn new(id: impl Into<String>) -> Self { Self { id: id.into(), link: None } }

    pub fn with_repo_id(mut self, repo_id: RepoId) -> Self { self.link = Some(ProjectLink { repo_id: Some(repo_id) }); self }

    /// Linked repository id, or the project id when the link is not reported.
    pub fn repo_id(&self) -> RepoId {
        self.link.as_ref().and_then(|l| l.repo_id.clone()).unwrap_or_else(|| RepoId::Text(self.id.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ProjectDeployment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub alias: Vec<String>,
}

impl ProjectDeployment {
    /// Primary URL, else first alias, else `<name>.<fallback_domain>`; always absolute https.
    pub fn live_url(&self, name: &str, fallback_domain: &str) -> String {
        let host = self.url.as_deref().filter(|u| !u.is_empty())
            .or_else(|| self.alias.first().map(String::as_str).filter(|a| !a.is_empty()));
        match host {
            Some(h) if h.starts_with("https://") => h.to_string(),
            Some(h) => format!("https://{}", h.strip_prefix("http://").unwrap_or(h)),
            None => format!("https://{name}.{fallback_domain}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IntegrationConfiguration {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(rename = "integrationId", default)]
    pub integration_id: Option<String>,
}

impl IntegrationConfiguration {
    /// Case-insensitive substring match on slug or integration id.
    pub fn matches(&self, needle: &str) -> bool {
        [&self.slug, &self.integration_id].into_iter().flatten().any(|s| s.to_lowercase().contains(needle))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IntegrationProduct {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl IntegrationProduct {
    /// What the direct-provisioning endpoint expects: slug, else id.
    pub fn key(&self) -> &str { self.slug.as_deref().unwrap_or(&self.id) }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManagedStore {
    pub id: String,
    #[serde(rename = "externalResourceId", default)]
    pub external_resource_id: Option<String>,
}

impl ManagedStore {
    pub fn resource_id(&self) -> &str { self.external_resource_id.as_deref().unwrap_or(&self.id) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConnection {
    pub project_id: String,
    pub env_var_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct OAuthExchange<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub code: &'a str,
    pub code_verifier: &'a str,
    pub redirect_uri: &'a str,
}

#[async_trait]
pub trait HostingPlatform: Send + Sync + 'static {
    /// `framework` is a hint; `None` lets the platform auto-detect.
    async fn create_project(&self, token: &str, name: &str, framework: Option<&str>, repo_full_name: &str) -> Result<HostingProject, ProviderError>;
    async fn create_deployment(&self, token: &str, name: &str, project: &HostingProject, git_ref: &str) -> Result<ProjectDeployment, ProviderError>;
    async fn list_integrations(&self, token: &str) -> Result<Vec<IntegrationConfiguration>, ProviderError>;
    async fn list_integration_products(&self, token: &str, configuration_id: &str) -> Result<Vec<IntegrationProduct>, ProviderError>;
    async fn create_store(&self, token: &str, name: &str, configuration_id: &str, product: &str) -> Result<ManagedStore, ProviderError>;
    async fn connect_store(&self, token: &str, configuration_id: &str, resource_id: &str, connection: &StoreConnection) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone)]
pub struct VercelClient { http: Client, base: String }

#[derive(Deserialize)]
struct Configurations { #[serde(default)] configurations: Vec<IntegrationConfiguration> }

#[derive(Deserialize)]
struct Products { #[serde(default)] products: Vec<IntegrationProduct> }

#[derive(Deserialize)]
struct StoreEnvelope { store: ManagedStore }

impl VercelClient {
    pub fn new(http: Client, base: impl Into<String>) -> Self { Self { http, base: base.into() } }

    fn post(&self, path: &str, token: &str) -> RequestBuilder { self.http.post(join(&self.base, path)).bearer_auth(token) }
    fn get(&self, path: &str, token: &str) -> RequestBuilder { self.http.get(join(&self.base, path)).bearer_auth(token) }

    /// Authorization-code exchange for a user token.
    pub async fn exchange_code(&self, params: &OAuthExchange<'_>) -> Result<OAuthToken, ProviderError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", params.client_id),
            ("client_secret", params.client_secret),
            ("code", params.code),
            ("code_verifier", params.code_verifier),
            ("redirect_uri", params.redirect_uri),
        ];
        let req = self.http.post(join(&self.base, "/login/oauth/token")).form(&form);
        let body = send_json(req, "Vercel token exchange failed").await?;
        decode(body, "token")
    }
}

#[async_trait]
impl HostingPlatform for VercelClient {
    async fn create_project(&self, token: &str, name: &str, framework: Option<&str>, repo_full_name: &str) -> Result<HostingProject, ProviderError> {
        let req = self.post("/v11/projects", token).json(&json!({
            "name": name,
            "framework": framework,
            "gitRepository": { "type": "github", "repo": repo_full_name },
        }));
        let body = send_json(req, PROJECT_CREATE_HINT).await?;
        let project: HostingProject = decode(body, "project")?;
        debug!(event = "vercel.project_created", project_id = %project.id);
        Ok(project)
    }

    async fn create_deployment(&self, token: &str, name: &str, project: &HostingProject, git_ref: &str) -> Result<ProjectDeployment, ProviderError> {
        let req = self.post("/v13/deployments", token).json(&json!({
            "name": name,
            "project": project.id,
            "target": "production",
            "gitSource": { "type": "github", "ref": git_ref, "repoId": project.repo_id() },
        }));
        let body = send_json(req, "Failed to deploy").await?;
        decode(body, "deployment")
    }

    async fn list_integrations(&self, token: &str) -> Result<Vec<IntegrationConfiguration>, ProviderError> {
        let body = send_json(self.get("/v1/integrations/configurations", token), "Failed to list integrations").await?;
        Ok(decode::<Configurations>(body, "integrations")?.configurations)
    }

    async fn list_integration_products(&self, token: &str, configuration_id: &str) -> Result<Vec<IntegrationProduct>, ProviderError> {
        let path = format!("/v1/integrations/configuration/{configuration_id}/products");
        let body = send_json(self.get(&path, token), "Failed to list integration products").await?;
        Ok(decode::<Products>(body, "products")?.products)
    }

    async fn create_store(&self, token: &str, name: &str, configuration_id: &str, product: &str) -> Result<ManagedStore, ProviderError> {
        let req = self.post("/v1/storage/stores/integration/direct", token).json(&json!({
            "name": name,
            "integrationConfigurationId": configuration_id,
            "integrationProductIdOrSlug": product,
        }));
        let body = send_json(req, "Failed to create store").await?;
        Ok(decode::<StoreEnvelope>(body, "store")?.store)
    }

    async fn connect_store(&self, token: &str, configuration_id: &str, resource_id: &str, connection: &StoreConnection) -> Result<(), ProviderError> {
        let path = format!("/v1/integrations/installations/{configuration_id}/resources/{resource_id}/connections");
        let req = self.post(&path, token).json(&json!({
            "projectId": connection.project_id,
            "environments": STORE_ENVIRONMENTS,
            "envVarKeys": connection.env_var_keys,
        }));
        send_json(req, "Failed to connect store").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_url_precedence() {
        let d = ProjectDeployment { id: None, url: Some("app-abc.vercel.app".into()), alias: vec!["app.vercel.app".into()] };
        assert_eq!(d.live_url("app", "vercel.app"), "https://app-abc.vercel.app");
        let d = ProjectDeployment { id: None, url: None, alias: vec!["https://app.example.com".into()] };
        assert_eq!(d.live_url("app", "vercel.app"), "https://app.example.com");
        assert_eq!(ProjectDeployment::default().live_url("app", "vercel.app"), "https://app.vercel.app");
    }

    #[test]
    fn hosts_starting_with_http_still_get_a_scheme() {
        let host = |u: &str| ProjectDeployment { id: None, url: Some(u.into()), alias: Vec::new() };
        assert_eq!(host("http-server-abc.vercel.app").live_url("x", "vercel.app"), "https://http-server-abc.vercel.app");
        assert_eq!(host("httpbin-abc.vercel.app").live_url("x", "vercel.app"), "https://httpbin-abc.vercel.app");
        assert_eq!(host("https-demo.vercel.app").live_url("x", "vercel.app"), "https://https-demo.vercel.app");
        assert_eq!(host("http://plain.example.com").live_url("x", "vercel.app"), "https://plain.example.com");
    }

    #[test]
    fn repo_id_falls_back_to_project_id() {
        let p: HostingProject = serde_json::from_value(serde_json::json!({"id": "prj_1", "link": {"repoId": 42}})).unwrap();
        assert_eq!(p.repo_id(), RepoId::Number(42));
        assert_eq!(HostingProject::new("prj_2").repo_id(), RepoId::Text("prj_2".into()));
    }

    #[test]
    fn integration_match_is_case_insensitive() {
        let c = IntegrationConfiguration { id: "icfg".into(), slug: Some("Neon".into()), integration_id: None };
        assert!(c.matches("neon"));
        let c = IntegrationConfiguration { id: "icfg".into(), slug: None, integration_id: Some("oac_MongoDB_atlas".into()) };
        assert!(c.matches("mongodb"));
        assert!(!c.matches("neon"));
    }
}
