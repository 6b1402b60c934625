use crate::config::DatabaseConfig;
use deadpool_sqlite::{Config, Hook, HookError, Pool, PoolConfig, Runtime};
use rusqlite::Connection;
use std::path::Path;

use super::migrations::run_migrations;

/// Settings that SQLite keeps per connection. Run on every pooled
/// connection as it is created.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA foreign_keys = ON;
    PRAGMA synchronous = NORMAL;
    PRAGMA cache_size = -16384;
    PRAGMA temp_store = MEMORY;
";

/// Database-wide settings; `journal_mode` persists in the file.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch(CONNECTION_PRAGMAS)
}

/// Build the connection pool. Connections open lazily, so a missing
/// database file is only created by `init_pool`.
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, Box<dyn std::error::Error>> {
    if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let cfg = Config {
        path: config.path.clone(),
        pool: Some(PoolConfig::new(config.pool_size.max(1))),
    };
    let pool = cfg
        .builder(Runtime::Tokio1)?
        .post_create(Hook::async_fn(|conn, _| {
            Box::pin(async move {
                conn.interact(|conn| conn.execute_batch(CONNECTION_PRAGMAS))
                    .await
                    .map_err(|e| HookError::Message(e.to_string().into()))?
                    .map_err(HookError::Backend)
            })
        }))
        .build()?;
    Ok(pool)
}

/// Open the database, apply settings and migrations, then lock down the file.
pub async fn init_pool(pool: &Pool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get().await?;
    let path = conn
        .interact(|conn| {
            apply_pragmas(conn)?;
            run_migrations(conn)?;
            Ok::<_, rusqlite::Error>(conn.path().map(str::to_string))
        })
        .await??;

    if let Some(path) = path.filter(|p| !p.is_empty()) {
        restrict_permissions(Path::new(&path));
    }
    Ok(())
}

/// Password hashes and key hashes live in this file.
fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!(error = %e, path = %path.display(), "failed to set database file permissions");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
