//! Content token query functions.

use ephemera_types::content::ContentToken;
use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// Insert a token mapping.
pub fn insert(conn: &Connection, token: &str, payload_ref: &str, created_at: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO content_tokens (token, payload_ref, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![token, payload_ref, created_at as i64],
    )?;
    Ok(())
}

/// Look up a token.
pub fn get(conn: &Connection, token: &str) -> Result<Option<ContentToken>> {
    let row = conn
        .query_row(
            "SELECT token, payload_ref, created_at FROM content_tokens WHERE token = ?1",
            [token],
            |row| {
                Ok(ContentToken {
                    token: row.get(0)?,
                    payload_ref: row.get(1)?,
                    created_at: row.get::<_, i64>(2)? as u64,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Hard-delete a token. Returns `false` if it did not exist.
pub fn delete(conn: &Connection, token: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM content_tokens WHERE token = ?1", [token])?;
    Ok(deleted > 0)
}
