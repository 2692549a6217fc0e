use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::config::JwtConfig;

/// Authenticated identity recovered from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
}

/// JWT payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,        // user ID
    pub username: String,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

/// Mints and checks signed, time-bound bearer tokens.
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, principal: &Principal) -> anyhow::Result<String>;

    fn verify(&self, token: &str) -> anyhow::Result<Principal>;
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
        }
    }

    pub fn decode_claims(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

impl TokenIssuer for JwtKeys {
    fn issue(&self, principal: &Principal) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: principal.user_id,
            username: principal.username.clone(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %principal.user_id, "jwt signed");
        Ok(token)
    }

    fn verify(&self, token: &str) -> anyhow::Result<Principal> {
        let claims = self.decode_claims(token)?;
        debug!(user_id = %claims.sub, "jwt verified");
        Ok(Principal {
            user_id: claims.sub,
            username: claims.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 5,
        })
    }

    fn alice() -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            username: "alice".into(),
        }
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let keys = make_keys("dev-secret", "test-issuer", "test-aud");
        let principal = alice();
        let token = keys.issue(&principal).expect("issue");
        assert_eq!(keys.verify(&token).expect("verify"), principal);

        let claims = keys.decode_claims(&token).expect("decode");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 5 * 60);
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let good = make_keys("same-secret", "good-iss", "good-aud");
        let bad = make_keys("same-secret", "bad-iss", "bad-aud");
        let token = good.issue(&alice()).unwrap();
        assert!(bad.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_other_secret() {
        let a = make_keys("secret-a", "iss", "aud");
        let b = make_keys("secret-b", "iss", "aud");
        let token = a.issue(&alice()).unwrap();
        assert!(b.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_expired_token() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let past = OffsetDateTime::now_utc() - TimeDuration::hours(2);
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "alice".into(),
            iat: past.unix_timestamp() as usize,
            exp: (past + TimeDuration::minutes(5)).unix_timestamp() as usize,
            iss: "iss".into(),
            aud: "aud".into(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_garbage() {
        let keys = make_keys("dev-secret", "iss", "aud");
        assert!(keys.verify("not.a.jwt").is_err());
    }
}
