use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::{error::ApiError, state::AppState, users::token::Principal};

/// Extracts and validates the bearer token, yielding the caller's identity.
#[derive(Debug)]
pub struct AuthUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization header".into()))?;

        match state.accounts.tokens().verify(token.trim()) {
            Ok(principal) => Ok(AuthUser(principal)),
            Err(e) => {
                warn!(error = %e, "invalid or expired token");
                Err(ApiError::Unauthorized("Invalid or expired token".into()))
            }
        }
    }
}

/// JSON body whose decode failures (bad syntax, wrong types, missing
/// content type) are reported as 400 with a `{"message"}` body.
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidJson(value)),
            Err(rejection) => {
                warn!(status = %rejection.status(), "rejected request body");
                Err(ApiError::Validation(rejection.body_text()))
            }
        }
    }
}
