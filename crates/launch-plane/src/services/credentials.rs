use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, Pool, Postgres};
use tracing::info;
use crate::{clients::{OAuthExchange, VercelClient}, error::{PipelineError, StoreError}, models::{Credential, Provider}};

#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Last write wins per (user, provider).
    async fn upsert(&self, credential: Credential) -> Result<(), StoreError>;
    async fn get(&self, user_id: &str, provider: Provider) -> Result<Option<Credential>, StoreError>;
    /// Token attached to the user's sign-in identity for `provider`, if any.
    async fn linked_identity_token(&self, user_id: &str, provider: Provider) -> Result<Option<String>, StoreError>;
}

/// Source-control token: the sign-in identity wins over a stored credential.
pub async fn source_control_token(store: &dyn CredentialStore, user_id: &str) -> Result<Option<String>, StoreError> {
    if let Some(token) = store.linked_identity_token(user_id, Provider::Github).await? {
        return Ok(Some(token));
    }
    Ok(store.get(user_id, Provider::Github).await?.map(|c| c.access_token))
}

pub async fn hosting_token(store: &dyn CredentialStore, user_id: &str) -> Result<Option<String>, StoreError> {
    Ok(store.get(user_id, Provider::Vercel).await?.map(|c| c.access_token))
}

/// Hosting-platform OAuth app: trades an authorization code for a user credential.
/// State and PKCE verification happen in the caller's authorize/callback flow.
#[derive(Clone)]
pub struct VercelOAuth { client: VercelClient, client_id: String, client_secret: String }

impl std::fmt::Debug for VercelOAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("VercelOAuth").field("client_id", &self.client_id).finish() }
}

impl VercelOAuth {
    pub fn new(client: VercelClient, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self { client, client_id: client_id.into(), client_secret: client_secret.into() }
    }

    pub async fn exchange(&self, user_id: &str, code: &str, code_verifier: &str, redirect_uri: &str) -> Result<Credential, PipelineError> {
        let token = self.client.exchange_code(&OAuthExchange {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            code,
            code_verifier,
            redirect_uri,
        }).await.map_err(|e| PipelineError::Provider(e.message))?;
        let expires_at = token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
        info!(event = "oauth.vercel.exchanged", user_id, has_refresh_token = token.refresh_token.is_some());
        Ok(Credential { user_id: user_id.to_string(), provider: Provider::Vercel, access_token: token.access_token, refresh_token: token.refresh_token, expires_at })
    }
}

#[derive(Debug, FromRow)]
struct CredentialRow {
    user_id: String,
    provider: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PgCredentialStore { pool: Pool<Postgres> }

impl PgCredentialStore {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn upsert(&self, c: Credential) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO credentials (user_id, provider, access_token, refresh_token, expires_at) VALUES ($1,$2,$3,$4,$5) \
                     ON CONFLICT (user_id, provider) DO UPDATE SET access_token = EXCLUDED.access_token, refresh_token = EXCLUDED.refresh_token, \
                     expires_at = EXCLUDED.expires_at, updated_at = NOW()")
            .bind(&c.user_id)
            .bind(c.provider.as_str())
            .bind(&c.access_token)
            .bind(&c.refresh_token)
            .bind(c.expires_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, user_id: &str, provider: Provider) -> Result<Option<Credential>, StoreError> {
        let row = sqlx::query_as::<_, CredentialRow>("SELECT user_id, provider, access_token, refresh_token, expires_at FROM credentials WHERE user_id = $1 AND provider = $2")
            .bind(user_id)
            .bind(provider.as_str())
            .fetch_optional(&self.pool).await?;
        let Some(r) = row else { return Ok(None) };
        let provider = Provider::parse(&r.provider).ok_or_else(|| StoreError::Corrupt(format!("unknown provider {:?}", r.provider)))?;
        Ok(Some(Credential { user_id: r.user_id, provider, access_token: r.access_token, refresh_token: r.refresh_token, expires_at: r.expires_at }))
    }

    async fn linked_identity_token(&self, user_id: &str, provider: Provider) -> Result<Option<String>, StoreError> {
        let token: Option<Option<String>> = sqlx::query_scalar("SELECT access_token FROM linked_identities WHERE user_id = $1 AND provider = $2")
            .bind(user_id)
            .bind(provider.as_str())
            .fetch_optional(&self.pool).await?;
        Ok(token.flatten().filter(|t| !t.is_empty()))
    }
}
