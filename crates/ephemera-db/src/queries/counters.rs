//! Free-view counter query functions.

use ephemera_types::PrincipalId;
use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// Consume one free view if the principal is still under `limit`.
///
/// The check and the increment are one conditional UPSERT, so concurrent
/// callers can never push the counter past `limit`. Returns the
/// post-increment count, or `None` when the limit was already reached.
pub fn try_consume(
    conn: &Connection,
    principal_id: PrincipalId,
    limit: u32,
    now: u64,
) -> Result<Option<u32>> {
    if limit == 0 {
        return Ok(None);
    }
    let count = conn
        .query_row(
            "INSERT INTO view_counters (principal_id, count, updated_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT(principal_id) DO UPDATE
                 SET count = count + 1, updated_at = excluded.updated_at
                 WHERE view_counters.count < ?3
             RETURNING count",
            rusqlite::params![principal_id, now as i64, i64::from(limit)],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(count.map(|c| c as u32))
}

/// Current count. Principals without a row have used nothing.
pub fn get(conn: &Connection, principal_id: PrincipalId) -> Result<u32> {
    let count = conn
        .query_row(
            "SELECT count FROM view_counters WHERE principal_id = ?1",
            [principal_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0) as u32)
}

/// Reset the counter to zero. No row is created for unseen principals.
pub fn reset(conn: &Connection, principal_id: PrincipalId, now: u64) -> Result<()> {
    conn.execute(
        "UPDATE view_counters SET count = 0, updated_at = ?2 WHERE principal_id = ?1",
        rusqlite::params![principal_id, now as i64],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_consume_up_to_limit() {
        let conn = test_db();
        assert_eq!(try_consume(&conn, 1, 3, 10).expect("1st"), Some(1));
        assert_eq!(try_consume(&conn, 1, 3, 11).expect("2nd"), Some(2));
        assert_eq!(try_consume(&conn, 1, 3, 12).expect("3rd"), Some(3));
        assert_eq!(try_consume(&conn, 1, 3, 13).expect("4th"), None);
        // Denials do not increment further.
        assert_eq!(get(&conn, 1).expect("get"), 3);
    }

    #[test]
    fn test_counters_are_per_principal() {
        let conn = test_db();
        try_consume(&conn, 1, 1, 10).expect("p1");
        assert_eq!(try_consume(&conn, 2, 1, 10).expect("p2"), Some(1));
        assert_eq!(try_consume(&conn, 1, 1, 10).expect("p1 again"), None);
    }

    #[test]
    fn test_zero_limit_creates_nothing() {
        let conn = test_db();
        assert_eq!(try_consume(&conn, 1, 0, 10).expect("consume"), None);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM view_counters", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_reset() {
        let conn = test_db();
        try_consume(&conn, 1, 3, 10).expect("consume");
        try_consume(&conn, 1, 3, 10).expect("consume");
        reset(&conn, 1, 20).expect("reset");
        assert_eq!(get(&conn, 1).expect("get"), 0);
        // Resetting an unseen principal is a no-op.
        reset(&conn, 99, 20).expect("reset unseen");
        assert_eq!(get(&conn, 99).expect("get"), 0);
    }
}
