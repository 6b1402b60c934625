use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

use crate::error::{AppError, AppResult};

/// Hash a secret into an argon2 PHC string.
pub fn hash_password(plain: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "argon2 hash_password error");
            AppError::Internal(format!("password hashing failed: {e}"))
        })
}

/// Verify a secret against a PHC string. A malformed hash never verifies.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// `hash_password` on tokio's blocking pool.
pub async fn spawn_hash_password(plain: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?
}

/// `verify_password` on tokio's blocking pool.
pub async fn spawn_verify_password(plain: String, hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("password verification task failed: {e}")))
}

/// True when `hash` looks like an argon2 PHC string.
pub fn is_phc_hash(hash: &str) -> bool {
    hash.starts_with("$argon2")
}
