use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use super::{decode, join, send_json, ProviderError};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    /// `owner/name`
    pub full_name: String,
}

impl Repository {
    pub fn web_url(&self) -> String { format!("https://github.com/{}", self.full_name) }
}

#[async_trait]
pub trait SourceControl: Send + Sync + 'static {
    /// Create a public, initialized repository under the token owner's account.
    async fn create_repository(&self, token: &str, name: &str, description: &str) -> Result<Repository, ProviderError>;
    /// Create or replace one file on `branch`, as its own commit.
    async fn put_file(&self, token: &str, repo: &Repository, path: &str, contents: &[u8], branch: &str) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GithubClient { http: Client, base: String }

impl GithubClient {
    pub fn new(http: Client, base: impl Into<String>) -> Self { Self { http, base: base.into() } }

    fn authed(&self, req: RequestBuilder, token: &str) -> RequestBuilder {
        req.bearer_auth(token)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", "2022-11-28")
    }

    fn contents_url(&self, repo: &Repository, path: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&join(&self.base, &format!("/repos/{}/contents", repo.full_name)))
            .map_err(|e| ProviderError::new(None, format!("invalid repository url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::new(None, "repository url cannot carry a path"))?
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

#[async_trait]
impl SourceControl for GithubClient {
    async fn create_repository(&self, token: &str, name: &str, description: &str) -> Result<Repository, ProviderError> {
        let req = self.authed(self.http.post(join(&self.base, "/user/repos")), token)
            .json(&json!({ "name": name, "description": description, "private": false, "auto_init": true }));
        let body = send_json(req, "Failed to create GitHub repo").await?;
        let repo: Repository = decode(body, "repository")?;
        debug!(event = "github.repo_created", repo = %repo.full_name);
        Ok(repo)
    }

    async fn put_file(&self, token: &str, repo: &Repository, path: &str, contents: &[u8], branch: &str) -> Result<(), ProviderError> {
        let url = self.contents_url(repo, path)?;
        let content = base64::engine::general_purpose::STANDARD.encode(contents);
        let req = self.authed(self.http.put(url), token)
            .json(&json!({ "message": format!("Add {path}"), "content": content, "branch": branch }));
        send_json(req, &format!("Failed to add {path}")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_url_encodes_segments() {
        let c = GithubClient::new(Client::new(), "http://localhost:1");
        let repo = Repository { full_name: "octo/app".into() };
        let url = c.contents_url(&repo, "src/my page.js").unwrap();
        assert_eq!(url.as_str(), "http://localhost:1/repos/octo/app/contents/src/my%20page.js");
    }

    #[test]
    fn web_url_from_full_name() {
        assert_eq!(Repository { full_name: "octo/app".into() }.web_url(), "https://github.com/octo/app");
    }
}
