use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::warn;

use crate::config::AppConfig;
use crate::users::{
    password::Argon2Hasher,
    repo::{CredentialStore, InMemoryCredentialStore, PgCredentialStore},
    services::AccountService,
    token::JwtKeys,
};

#[derive(Clone)]
pub struct AppState {
    pub accounts: AccountService,
    pub db: Option<PgPool>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let Some(url) = config.database_url.clone() else {
            warn!("DATABASE_URL not set; accounts are kept in memory and lost on restart");
            return Ok(Self::in_memory(&config));
        };

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await
            .context("connect to database")?;

        let store = Arc::new(PgCredentialStore::new(db.clone())) as Arc<dyn CredentialStore>;
        let mut state = Self::from_parts(&config, store);
        state.db = Some(db);
        Ok(state)
    }

    pub fn from_parts(config: &AppConfig, store: Arc<dyn CredentialStore>) -> Self {
        let keys = JwtKeys::from_config(&config.jwt);
        let accounts = AccountService::new(store, Arc::new(Argon2Hasher), Arc::new(keys));
        Self {
            accounts,
            db: None,
        }
    }

    pub fn in_memory(config: &AppConfig) -> Self {
        Self::from_parts(config, Arc::new(InMemoryCredentialStore::new()))
    }
}
