use deadpool_sqlite::Pool;
use moka::sync::Cache;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::password::{is_phc_hash, verify_password};
use crate::error::{pooled, AppResult};
use crate::types::now_millis;

/// Headers an API key may arrive in, in priority order.
pub const API_KEY_HEADERS: [&str; 2] = ["x-ingest-api-key", "x-api-key"];

/// Scopes accepted when creating a key.
pub const VALID_SCOPES: &[&str] = &["ingest", "read:metrics", "manage:apikeys", "admin"];

/// Scopes that pass admin gating.
pub const ELEVATED_SCOPES: &[&str] = &["admin", "read:metrics", "manage:apikeys"];

/// How many enabled keys the legacy argon2 path inspects.
const LEGACY_SCAN_LIMIT: i64 = 50;

/// Injected into request extensions after successful API key validation.
#[derive(Clone, Debug)]
pub struct KeyAuth {
    pub id: String,
    pub key_id: String,
    pub name: Option<String>,
    pub scopes: Vec<String>,
    pub owner: Option<String>,
}

impl KeyAuth {
    pub fn is_elevated(&self) -> bool {
        self.scopes
            .iter()
            .any(|s| ELEVATED_SCOPES.contains(&s.as_str()))
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let scopes_json: String = row.get(3)?;
        Ok(Self {
            id: row.get(0)?,
            key_id: row.get(1)?,
            name: row.get(2)?,
            scopes: serde_json::from_str(&scopes_json).unwrap_or_default(),
            owner: row.get(4)?,
        })
    }
}

/// How a presented key string should be looked up.
#[derive(Debug, PartialEq, Eq)]
enum Presented<'a> {
    /// `keyId.secret`
    Split { key_id: &'a str, secret: &'a str },
    /// A bare secret from older clients.
    Raw(&'a str),
    Malformed,
}

fn parse_presented(token: &str) -> Presented<'_> {
    match token.split_once('.') {
        Some((key_id, secret)) if !key_id.is_empty() && !secret.is_empty() => {
            Presented::Split { key_id, secret }
        }
        Some(_) => Presented::Malformed,
        None if token.is_empty() => Presented::Malformed,
        None => Presented::Raw(token),
    }
}

/// Cached API key lookup: SHA-256 of the presented token → KeyAuth.
#[derive(Clone)]
pub struct ApiKeyCache {
    cache: Cache<String, KeyAuth>,
    pool: Pool,
}

impl ApiKeyCache {
    pub fn new(pool: Pool, ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self { cache, pool }
    }

    /// Resolve a presented key to its record. `Ok(None)` means the key is
    /// unknown, malformed or disabled.
    pub async fn resolve(&self, token: &str) -> AppResult<Option<KeyAuth>> {
        let cache_key = hash_token(token);
        if let Some(auth) = self.cache.get(&cache_key) {
            return Ok(Some(auth));
        }

        let lookup = match parse_presented(token) {
            Presented::Malformed => return Ok(None),
            Presented::Split { key_id, secret } => {
                Lookup::ById(key_id.to_string(), hash_token(secret))
            }
            Presented::Raw(raw) => Lookup::Raw(raw.to_string()),
        };

        let conn = pooled(&self.pool).await?;
        let found = conn.interact(move |conn| lookup.run(conn)).await??;

        if let Some(ref auth) = found {
            tracing::debug!(key_id = %auth.key_id, "api key resolved");
            self.cache.insert(cache_key, auth.clone());
        }
        Ok(found)
    }

    /// Drop all cached resolutions (after a key is disabled).
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Update last_used_at in the background (fire-and-forget).
    pub fn touch_last_used(&self, id: String) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let now = now_millis();
            if let Ok(conn) = pool.get().await {
                let _ = conn
                    .interact(move |conn| {
                        conn.execute(
                            "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
                            rusqlite::params![now, id],
                        )
                    })
                    .await;
            }
        });
    }
}

enum Lookup {
    ById(String, String),
    Raw(String),
}

const KEY_COLUMNS: &str = "id, key_id, name, scopes, owner";

impl Lookup {
    fn run(self, conn: &rusqlite::Connection) -> rusqlite::Result<Option<KeyAuth>> {
        use rusqlite::OptionalExtension;

        match self {
            Lookup::ById(key_id, hash) => conn
                .query_row(
                    &format!(
                        "SELECT {KEY_COLUMNS} FROM api_keys
                         WHERE key_id = ?1 AND hash = ?2 AND disabled = 0"
                    ),
                    rusqlite::params![key_id, hash],
                    KeyAuth::from_row,
                )
                .optional(),
            Lookup::Raw(raw) => {
                let hash = hash_token(&raw);
                let direct = conn
                    .query_row(
                        &format!(
                            "SELECT {KEY_COLUMNS} FROM api_keys
                             WHERE hash = ?1 AND disabled = 0 LIMIT 1"
                        ),
                        rusqlite::params![hash],
                        KeyAuth::from_row,
                    )
                    .optional()?;
                if direct.is_some() {
                    return Ok(direct);
                }

                // Older keys were stored as argon2 hashes of the whole token
                let mut stmt = conn.prepare(&format!(
                    "SELECT {KEY_COLUMNS}, hash FROM api_keys
                     WHERE disabled = 0
                     ORDER BY created_at
                     LIMIT ?1"
                ))?;
                let candidates = stmt
                    .query_map(rusqlite::params![LEGACY_SCAN_LIMIT], |row| {
                        Ok((KeyAuth::from_row(row)?, row.get::<_, String>(5)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(candidates
                    .into_iter()
                    .filter(|(_, stored)| is_phc_hash(stored))
                    .find(|(_, stored)| verify_password(&raw, stored))
                    .map(|(auth, _)| {
                        tracing::info!(key_id = %auth.key_id, "api key matched legacy hash");
                        auth
                    }))
            }
        }
    }
}

/// SHA-256 hash of a secret, returned as hex.
pub fn hash_token(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a fresh `(key_id, secret)` pair. The public key is `key_id.secret`.
pub fn generate_key() -> (String, String) {
    let mut id_bytes = [0u8; 8];
    let mut secret_bytes = [0u8; 24];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut id_bytes);
    rng.fill_bytes(&mut secret_bytes);
    (hex::encode(id_bytes), hex::encode(secret_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_sha256_hex() {
        let hash = hash_token("anything");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_token("anything"));
        assert_ne!(hash, hash_token("anything-else"));
    }

    #[test]
    fn test_generate_key_shape() {
        let (key_id, secret) = generate_key();
        assert_eq!(key_id.len(), 16);
        assert_eq!(secret.len(), 48);
        assert!(!key_id.contains('.'));
        let (other_id, other_secret) = generate_key();
        assert_ne!(key_id, other_id);
        assert_ne!(secret, other_secret);
    }

    #[test]
    fn test_parse_presented() {
        assert_eq!(
            parse_presented("abc.def"),
            Presented::Split {
                key_id: "abc",
                secret: "def"
            }
        );
        assert_eq!(parse_presented("bogus"), Presented::Raw("bogus"));
        assert_eq!(parse_presented(".def"), Presented::Malformed);
        assert_eq!(parse_presented("abc."), Presented::Malformed);
        assert_eq!(parse_presented(""), Presented::Malformed);
    }

    #[test]
    fn test_secret_may_contain_dots() {
        assert_eq!(
            parse_presented("abc.def.ghi"),
            Presented::Split {
                key_id: "abc",
                secret: "def.ghi"
            }
        );
    }

    #[test]
    fn test_elevated_scopes() {
        let mut auth = KeyAuth {
            id: "1".into(),
            key_id: "k".into(),
            name: None,
            scopes: vec!["ingest".into()],
            owner: None,
        };
        assert!(!auth.is_elevated());
        auth.scopes.push("read:metrics".into());
        assert!(auth.is_elevated());
    }
}
