//! HTTP clients for the source-control and hosting providers.

pub mod github;
pub mod vercel;

use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use github::{GithubClient, Repository, SourceControl};
pub use vercel::{HostingPlatform, HostingProject, IntegrationConfiguration, IntegrationProduct, ManagedStore, OAuthExchange, OAuthToken, ProjectDeployment, RepoId, StoreConnection, VercelClient};

/// A failed call to an external provider, carrying the provider's own message when it gave one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self { Self { status, message: message.into() } }

    fn transport(e: reqwest::Error, fallback: &str) -> Self {
        if e.is_timeout() { return Self::new(None, format!("{fallback}: request timed out")); }
        Self::new(e.status().map(|s| s.as_u16()), format!("{fallback}: {e}"))
    }
}

/// `{"error":{"message"}}`, then `{"message"}`, then a bare string `{"error"}`.
pub fn extract_message(body: &Value) -> Option<String> {
    body.pointer("/error/message").and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .or_else(|| body.get("error").and_then(Value::as_str))
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

pub fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("launch-plane/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::new(None, format!("http client init failed: {e}")))
}

/// Send and decode a JSON response. Non-2xx responses become a [`ProviderError`]
/// with the extracted message, or `fallback` when the body has none.
pub(crate) async fn send_json(req: RequestBuilder, fallback: &str) -> Result<Value, ProviderError> {
    let resp = req.send().await.map_err(|e| ProviderError::transport(e, fallback))?;
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(|e| ProviderError::transport(e, fallback))?;
    let body: Value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    if !status.is_success() {
        let message = extract_message(&body).unwrap_or_else(|| fallback.to_string());
        debug!(event = "provider.error_response", status = status.as_u16(), message = %message);
        return Err(ProviderError::new(Some(status.as_u16()), message));
    }
    Ok(body)
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(body: Value, what: &str) -> Result<T, ProviderError> {
    serde_json::from_value(body).map_err(|e| ProviderError::new(None, format!("unexpected {what} response: {e}")))
}

pub(crate) fn join(base: &str, path: &str) -> String { format!("{}{}", base.trim_end_matches('/'), path) }

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_extraction_order() {
        assert_eq!(extract_message(&json!({"error": {"message": "nested"}, "message": "flat"})).as_deref(), Some("nested"));
        assert_eq!(extract_message(&json!({"message": "flat"})).as_deref(), Some("flat"));
        assert_eq!(extract_message(&json!({"error": "bare"})).as_deref(), Some("bare"));
        assert_eq!(extract_message(&json!({"error": {"code": "x"}})), None);
        assert_eq!(extract_message(&Value::Null), None);
    }

    #[test]
    fn join_trims_trailing_slash() {
        assert_eq!(join("http://x/", "/user/repos"), "http://x/user/repos");
    }
}
