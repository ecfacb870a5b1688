use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use crate::{AppState, auth::UserId, error::{ApiResult, PipelineError}, models::{Credential, Provider}, services::credentials::{hosting_token, source_control_token}};

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ConnectionsResponse { pub github: bool, pub vercel: bool }

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest { #[serde(default)] pub token: Option<String> }

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCodeRequest { pub code: String, pub code_verifier: String, pub redirect_uri: String }

#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectResponse { pub success: bool }

/// Which provider credentials the caller has connected.
#[utoipa::path(get, path = "/connections", responses( (status = 200, body = ConnectionsResponse) ))]
#[tracing::instrument(level = "debug", skip(state), fields(user_id = %user.as_str()))]
pub async fn get_connections(State(state): State<AppState>, user: UserId) -> ApiResult<Json<ConnectionsResponse>> {
    let (github, vercel) = tokio::join!(
        source_control_token(state.credentials.as_ref(), user.as_str()),
        hosting_token(state.credentials.as_ref(), user.as_str()),
    );
    Ok(Json(ConnectionsResponse {
        github: github.map_err(PipelineError::from)?.is_some(),
        vercel: vercel.map_err(PipelineError::from)?.is_some(),
    }))
}

async fn store_token(state: &AppState, user: &UserId, provider: Provider, req: TokenRequest) -> ApiResult<Json<ConnectResponse>> {
    let token = req.token.as_deref().map(str::trim).unwrap_or("");
    if token.is_empty() { return Err(PipelineError::Validation("Token required".into()).into()); }
    state.credentials.upsert(Credential::bearer(user.as_str(), provider, token)).await.map_err(PipelineError::from)?;
    tracing::info!(event = "connect.token_saved", provider = provider.as_str());
    Ok(Json(ConnectResponse { success: true }))
}

/// Save a GitHub personal access token.
#[utoipa::path(post, path = "/connect/github", request_body = TokenRequest, responses(
    (status = 200, body = ConnectResponse),
    (status = 400, body = crate::error::ApiErrorBody, description = "blank token"),
))]
#[tracing::instrument(level = "info", skip(state, req), fields(user_id = %user.as_str()))]
pub async fn connect_github(State(state): State<AppState>, user: UserId, Json(req): Json<TokenRequest>) -> ApiResult<Json<ConnectResponse>> {
    store_token(&state, &user, Provider::Github, req).await
}

/// Save a Vercel access token.
#[utoipa::path(post, path = "/connect/vercel", request_body = TokenRequest, responses(
    (status = 200, body = ConnectResponse),
    (status = 400, body = crate::error::ApiErrorBody, description = "blank token"),
))]
#[tracing::instrument(level = "info", skip(state, req), fields(user_id = %user.as_str()))]
pub async fn connect_vercel(State(state): State<AppState>, user: UserId, Json(req): Json<TokenRequest>) -> ApiResult<Json<ConnectResponse>> {
    store_token(&state, &user, Provider::Vercel, req).await
}

/// Finish the Vercel OAuth flow: exchange the authorization code and store the credential.
#[utoipa::path(post, path = "/connect/vercel/oauth", request_body = OAuthCodeRequest, responses(
    (status = 200, body = ConnectResponse),
    (status = 400, body = crate::error::ApiErrorBody, description = "OAuth app not configured"),
    (status = 500, body = crate::error::ApiErrorBody, description = "token exchange failed"),
))]
#[tracing::instrument(level = "info", skip(state, req), fields(user_id = %user.as_str()))]
pub async fn connect_vercel_oauth(State(state): State<AppState>, user: UserId, Json(req): Json<OAuthCodeRequest>) -> ApiResult<Json<ConnectResponse>> {
    let Some(oauth) = state.vercel_oauth.as_ref() else {
        return Err(PipelineError::PreconditionFailed("Vercel OAuth is not configured".into()).into());
    };
    if req.code.trim().is_empty() { return Err(PipelineError::Validation("Authorization code required".into()).into()); }
    let credential = oauth.exchange(user.as_str(), req.code.trim(), &req.code_verifier, &req.redirect_uri).await?;
    state.credentials.upsert(credential).await.map_err(PipelineError::from)?;
    Ok(Json(ConnectResponse { success: true }))
}
