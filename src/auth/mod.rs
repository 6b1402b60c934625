pub mod api_key;
pub mod handler;
pub mod jwt;
pub mod key_routes;
pub mod middleware;
pub mod password;

use crate::config::AuthConfig;
use api_key::ApiKeyCache;
use deadpool_sqlite::Pool;
use jwt::JwtKeys;

/// Shared auth state: used as handler state for `/api/auth` and key
/// management, and as a request extension by the auth middleware.
pub struct AuthState {
    pub pool: Pool,
    pub jwt: JwtKeys,
    pub keys: ApiKeyCache,
    pub admin_registration_code: Option<String>,
}

impl AuthState {
    pub fn new(config: &AuthConfig, pool: Pool) -> Self {
        Self {
            jwt: JwtKeys::from_config(config),
            keys: ApiKeyCache::new(pool.clone(), config.key_cache_ttl_secs),
            admin_registration_code: config.admin_registration_code.clone(),
            pool,
        }
    }
}
