//! Request extractors.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use dyscreen_core::model::User;

use super::rejections::{AppError, ResultExt};
use crate::AppState;

/// The registered user behind the request's bearer token.
///
/// Rejects with 401 when the header is missing, the verifier refuses the
/// token, or the identity has never logged in.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AppError::Unauthorized)?;

        let identity = state.verifier.verify(token).await.map_err(|e| {
            tracing::debug!("bearer token rejected: {e:#}");
            AppError::Unauthorized
        })?;

        let user = state
            .users
            .find_by_subject(&identity.subject)
            .await
            .reject("could not look up user")?
            .ok_or(AppError::Unauthorized)?;

        Ok(AuthUser(user))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
