use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{
    error::ApiError,
    users::{
        dto::{LoginRequest, LoginResponse, RegisterRequest, UpdatePasswordRequest, UserSummary},
        password::PasswordHasher,
        repo::{CredentialStore, StoreError},
        repo_types::User,
        token::{Principal, TokenIssuer},
    },
};

pub const TOKEN_TYPE: &str = "Bearer";

// Hashed once and verified against for unknown usernames.
const DUMMY_PASSWORD: &str = "trackit-dummy-password";

/// Registration, login, password change and profile lookup.
///
/// Holds no state of its own; every operation goes through the collaborators
/// passed to [`AccountService::new`].
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenIssuer>,
    dummy_hash: Arc<OnceCell<String>>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenIssuer>,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn tokens(&self) -> &dyn TokenIssuer {
        self.tokens.as_ref()
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<User, ApiError> {
        let username = req.username.trim();
        if username.is_empty() {
            warn!("empty username");
            return Err(ApiError::Validation("Username cannot be empty".into()));
        }

        // Fast path only; the store's uniqueness check is authoritative.
        if self.store.find_by_username(username).await?.is_some() {
            warn!(%username, "username already registered");
            return Err(ApiError::Conflict("Username already exists".into()));
        }

        let password = match req.password.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => {
                warn!(%username, "empty password");
                return Err(ApiError::Validation("Password cannot be empty".into()));
            }
        };

        let hash = self.hasher.hash(password)?;
        let user = match self.store.insert(username, &hash).await {
            Ok(u) => u,
            Err(StoreError::DuplicateUsername) => {
                warn!(%username, "username taken by a concurrent registration");
                return Err(ApiError::Conflict("Username already exists".into()));
            }
            Err(e) => return Err(e.into()),
        };

        info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, ApiError> {
        let username = req.username.trim();
        info!(%username, "login attempt");

        let Some(user) = self.store.find_by_username(username).await? else {
            // pay the same Argon2 cost as a wrong password
            self.verify_against_dummy(&req.password).await;
            warn!(%username, "login unknown username");
            return Err(invalid_credentials());
        };

        if !self.hasher.verify(&req.password, &user.password_hash)? {
            warn!(%username, user_id = %user.id, "login invalid password");
            return Err(invalid_credentials());
        }

        let principal = Principal {
            user_id: user.id,
            username: user.username.clone(),
        };
        let token = self.tokens.issue(&principal)?;

        info!(user_id = %user.id, %username, "user logged in");
        Ok(LoginResponse {
            token,
            token_type: TOKEN_TYPE,
            user: UserSummary {
                id: user.id,
                username: user.username,
            },
        })
    }

    pub async fn update_password(
        &self,
        principal: &Principal,
        req: UpdatePasswordRequest,
    ) -> Result<(), ApiError> {
        let Some(user) = self.store.find_by_username(&principal.username).await? else {
            warn!(username = %principal.username, "password update for unknown user");
            return Err(ApiError::Unauthorized("User not found".into()));
        };

        let (Some(old_password), Some(new_password)) = (req.old_password, req.new_password) else {
            return Err(ApiError::Validation(
                "Old and new password are required".into(),
            ));
        };
        if new_password.is_empty() {
            return Err(ApiError::Validation("New password cannot be empty".into()));
        }

        if !self.hasher.verify(&old_password, &user.password_hash)? {
            warn!(user_id = %user.id, "password update with wrong old password");
            return Err(ApiError::Unauthorized("Old password is incorrect".into()));
        }

        let hash = self.hasher.hash(&new_password)?;
        match self.store.update_password_hash(user.id, &hash).await {
            Ok(()) => {}
            Err(StoreError::UserNotFound) => {
                return Err(ApiError::Unauthorized("User not found".into()))
            }
            Err(e) => return Err(e.into()),
        }

        info!(user_id = %user.id, "password updated");
        Ok(())
    }

    pub async fn profile(&self, principal: &Principal) -> Result<User, ApiError> {
        self.store
            .find_by_username(&principal.username)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))
    }

    async fn verify_against_dummy(&self, plain: &str) {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| async { self.hasher.hash(DUMMY_PASSWORD) })
            .await;
        match dummy {
            Ok(hash) => {
                let _ = self.hasher.verify(plain, hash);
            }
            Err(e) => warn!(error = %e, "dummy hash unavailable"),
        }
    }
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid credentials".into())
}
