use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    error::ApiError,
    state::AppState,
    users::{
        dto::{LoginRequest, LoginResponse, MessageResponse, RegisterRequest, UpdatePasswordRequest},
        extractors::{AuthUser, ValidJson},
        repo_types::User,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/update-password", post(update_password))
        .route("/profile", get(profile))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<RegisterRequest>,
) -> Result<Json<User>, ApiError> {
    let user = state.accounts.register(payload).await?;
    Ok(Json(user))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let resp = state.accounts.login(payload).await?;
    Ok(Json(resp))
}

#[instrument(skip(state, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ValidJson(payload): ValidJson<UpdatePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.accounts.update_password(&principal, payload).await?;
    Ok(Json(MessageResponse {
        message: "Password updated successfully".into(),
    }))
}

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<User>, ApiError> {
    let user = state.accounts.profile(&principal).await?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[test]
    fn user_serialization_omits_password_hash() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            password_hash: "$argon2id$v=19$secret".to_string(),
            created_at: OffsetDateTime::now_utc(),
        };

        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["username"], "alice");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("passwordHash").is_none());
        assert!(!json.to_string().contains("argon2"));
    }
}
