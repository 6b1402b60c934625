use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};

/// JWT payload: the user id plus issue/expiry times (unix seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signing and verification keys derived from the server secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.token_ttl_days)
    }

    pub fn sign(&self, user_id: &str) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            id: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
    }

    /// Verify signature and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        tracing::debug!(user_id = %data.claims.id, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keys = JwtKeys::new("test-secret", 30);
        let token = keys.sign("user-1").unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.id, "user-1");
        assert_eq!(claims.exp - claims.iat, 30 * 86_400);
    }

    #[test]
    fn test_verify_rejects_other_secret() {
        let token = JwtKeys::new("secret-a", 30).sign("user-1").unwrap();
        assert!(JwtKeys::new("secret-b", 30).verify(&token).is_err());
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let keys = JwtKeys::new("test-secret", 30);
        let claims = Claims {
            id: "user-1".into(),
            iat: 1_000,
            exp: 2_000,
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let keys = JwtKeys::new("test-secret", 30);
        assert!(keys.verify("not.a.jwt").is_err());
    }
}
