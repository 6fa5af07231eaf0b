//! Scheduled revocation deadline table.
//!
//! One row per delivered item. Re-arming replaces the row; firing claims it
//! with a conditional delete so a deadline is acted on at most once.

use ephemera_types::content::{RevocationKey, ScheduledRevocation};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::Result;

fn from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledRevocation> {
    Ok(ScheduledRevocation {
        key: RevocationKey::new(row.get(0)?, row.get(1)?),
        armed_at: row.get::<_, i64>(2)? as u64,
        fire_at: row.get::<_, i64>(3)? as u64,
    })
}

/// Insert or replace the deadline for `key` (last writer wins).
pub fn upsert(conn: &Connection, key: RevocationKey, armed_at: u64, fire_at: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO scheduled_revocations (destination, item_id, armed_at, fire_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(destination, item_id) DO UPDATE
             SET armed_at = excluded.armed_at, fire_at = excluded.fire_at",
        rusqlite::params![key.destination, key.item_id, armed_at as i64, fire_at as i64],
    )?;
    Ok(())
}

/// Current deadline for `key`.
pub fn get(conn: &Connection, key: RevocationKey) -> Result<Option<ScheduledRevocation>> {
    Ok(conn
        .query_row(
            "SELECT destination, item_id, armed_at, fire_at FROM scheduled_revocations
             WHERE destination = ?1 AND item_id = ?2",
            rusqlite::params![key.destination, key.item_id],
            from_row,
        )
        .optional()?)
}

/// Delete the row if its deadline is at or before `deadline`.
///
/// Returns `true` if the caller now owns the revocation.
pub fn claim(conn: &Connection, key: RevocationKey, deadline: u64) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM scheduled_revocations
         WHERE destination = ?1 AND item_id = ?2 AND fire_at <= ?3",
        rusqlite::params![key.destination, key.item_id, deadline as i64],
    )?;
    Ok(deleted > 0)
}

/// Drop the deadline unconditionally.
pub fn remove(conn: &Connection, key: RevocationKey) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM scheduled_revocations WHERE destination = ?1 AND item_id = ?2",
        rusqlite::params![key.destination, key.item_id],
    )?;
    Ok(deleted > 0)
}

/// All pending deadlines, earliest first.
pub fn list_pending(conn: &Connection) -> Result<Vec<ScheduledRevocation>> {
    let mut stmt = conn.prepare(
        "SELECT destination, item_id, armed_at, fire_at FROM scheduled_revocations
         ORDER BY fire_at ASC",
    )?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Deadlines at or before `now`, earliest first.
pub fn list_due(conn: &Connection, now: u64) -> Result<Vec<ScheduledRevocation>> {
    let mut stmt = conn.prepare(
        "SELECT destination, item_id, armed_at, fire_at FROM scheduled_revocations
         WHERE fire_at <= ?1 ORDER BY fire_at ASC",
    )?;
    let rows = stmt
        .query_map([now as i64], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_upsert_replaces_deadline() {
        let conn = test_db();
        let key = RevocationKey::new(10, 500);
        upsert(&conn, key, 100, 1_000).expect("arm");
        upsert(&conn, key, 200, 1_100).expect("re-arm");
        let row = get(&conn, key).expect("get").expect("present");
        assert_eq!(row.armed_at, 200);
        assert_eq!(row.fire_at, 1_100);
        assert_eq!(list_pending(&conn).expect("list").len(), 1);
    }

    #[test]
    fn test_claim_respects_deadline() {
        let conn = test_db();
        let key = RevocationKey::new(10, 500);
        upsert(&conn, key, 100, 1_000).expect("arm");
        assert!(!claim(&conn, key, 999).expect("early claim"));
        assert!(claim(&conn, key, 1_000).expect("claim"));
        assert!(!claim(&conn, key, 1_000).expect("second claim"));
    }

    #[test]
    fn test_list_due() {
        let conn = test_db();
        upsert(&conn, RevocationKey::new(1, 1), 0, 50).expect("a");
        upsert(&conn, RevocationKey::new(1, 2), 0, 150).expect("b");
        let due = list_due(&conn, 100).expect("due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, RevocationKey::new(1, 1));
    }

    #[test]
    fn test_remove() {
        let conn = test_db();
        let key = RevocationKey::new(1, 1);
        upsert(&conn, key, 0, 50).expect("arm");
        assert!(remove(&conn, key).expect("remove"));
        assert!(!remove(&conn, key).expect("again"));
    }
}
