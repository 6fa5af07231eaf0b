//! Forward-only schema migrations.
//!
//! `PRAGMA user_version` records the last applied step. Each step runs in
//! its own transaction together with the version bump, so a crash leaves
//! the database at a step boundary.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Ordered `(version, sql)` steps. Append only.
const STEPS: &[(u32, &str)] = &[(1, schema::SCHEMA_V1)];

fn user_version(conn: &Connection) -> Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(DbError::Sqlite)
}

/// Apply every step newer than the stored version.
pub fn run(conn: &Connection) -> Result<()> {
    let current = user_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database is at v{current}, this build only knows v{SCHEMA_VERSION}"
        )));
    }

    for &(version, sql) in STEPS.iter().filter(|(v, _)| *v > current) {
        tracing::info!(from = current, to = version, "applying schema migration");
        let tx = conn.unchecked_transaction().map_err(DbError::Sqlite)?;
        tx.execute_batch(sql)
            .map_err(|e| DbError::Migration(format!("step v{version} failed: {e}")))?;
        tx.pragma_update(None, "user_version", version)
            .map_err(DbError::Sqlite)?;
        tx.commit().map_err(DbError::Sqlite)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_end_at_schema_version() {
        let last = STEPS.last().map(|(v, _)| *v);
        assert_eq!(last, Some(SCHEMA_VERSION));
        assert!(STEPS.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().expect("open");
        run(&conn).expect("migrate");
        assert_eq!(user_version(&conn).expect("version"), SCHEMA_VERSION);

        // Second run has nothing to apply.
        run(&conn).expect("rerun");
        assert_eq!(user_version(&conn).expect("version"), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_database_rejected() {
        let conn = Connection::open_in_memory().expect("open");
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .expect("bump version");
        assert!(matches!(run(&conn), Err(DbError::Migration(_))));
    }

    #[test]
    fn test_all_tables_present() {
        let conn = Connection::open_in_memory().expect("open");
        run(&conn).expect("migrate");

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .expect("prepare");
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query")
            .collect::<std::result::Result<_, _>>()
            .expect("rows");
        for table in [
            "content_tokens",
            "pending_payments",
            "scheduled_revocations",
            "subscriptions",
            "view_counters",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing table {table}");
        }
    }
}
