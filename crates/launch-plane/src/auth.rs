use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use crate::error::ApiError;

/// Set by the identity layer in front of this service (signed-in or guest user).
pub const USER_ID_HEADER: &str = "x-user-id";

/// Opaque id of the calling user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str { &self.0 }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts.headers.get(USER_ID_HEADER).and_then(|v| v.to_str().ok()).map(str::trim).unwrap_or("");
        if raw.is_empty() { return Err(ApiError::unauthorized("missing user identity")); }
        Ok(UserId(raw.to_string()))
    }
}
