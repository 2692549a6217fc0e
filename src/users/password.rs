use argon2::{
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    },
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

/// One-way password hashing.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plain: &str) -> anyhow::Result<String>;

    /// `Ok(false)` on mismatch; `Err` only when `hash` cannot be parsed.
    fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool>;
}

/// Argon2id with default parameters and a fresh salt per hash.
#[derive(Clone, Default)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        Ok(Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }
}
