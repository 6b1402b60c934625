use rusqlite::{Connection, TransactionBehavior};

use crate::types::now_millis;

/// Ordered schema versions. Append only; never edit a shipped entry.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "001_initial", include_str!("../../migrations/001_initial.sql")),
    (2, "002_billing", include_str!("../../migrations/002_billing.sql")),
];

/// Highest applied schema version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
}

/// Bring the schema up to date. Each version is applied atomically with its
/// bookkeeping row, so a failed migration leaves the previous version intact.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )?;

    let current = schema_version(conn)?;
    for &(version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
        tracing::info!(version, migration = name, "applying migration");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![version, name, now_millis()],
        )?;
        tx.commit()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_user_role_is_constrained() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let err = conn.execute(
            "INSERT INTO users (id, name, email, password_hash, role, created_at)
             VALUES ('u1', 'A', 'a@example.com', 'x', 'owner', 0)",
            [],
        );
        assert!(err.is_err(), "unknown role should violate CHECK constraint");
    }

    #[test]
    fn test_email_is_unique() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let insert = "INSERT INTO users (id, name, email, password_hash, created_at)
                      VALUES (?1, 'A', 'a@example.com', 'x', 0)";
        conn.execute(insert, ["u1"]).unwrap();
        assert!(conn.execute(insert, ["u2"]).is_err());
    }
}
