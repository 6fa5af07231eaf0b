//! Subscription ledger query functions.
//!
//! Rows are append-only except `notify_status`, which only moves forward.

use ephemera_types::billing::{NotifyStatus, Subscription};
use ephemera_types::{PaymentId, PrincipalId, SubscriptionId};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::Result;

const COLUMNS: &str =
    "id, principal_id, tier, price, payment_id, created_at, expires_at, notify_status";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        principal_id: row.get(1)?,
        tier: row.get(2)?,
        price: row.get::<_, i64>(3)? as u64,
        payment_id: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
        expires_at: row.get::<_, i64>(6)? as u64,
        notify_status: NotifyStatus::from_u8(row.get::<_, i64>(7)? as u8),
    })
}

/// Append a subscription row.
pub fn insert(
    conn: &Connection,
    principal_id: PrincipalId,
    tier: &str,
    price: u64,
    payment_id: Option<PaymentId>,
    created_at: u64,
    expires_at: u64,
) -> Result<Subscription> {
    conn.execute(
        "INSERT INTO subscriptions
         (principal_id, tier, price, payment_id, created_at, expires_at, notify_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        rusqlite::params![
            principal_id,
            tier,
            price as i64,
            payment_id,
            created_at as i64,
            expires_at as i64,
        ],
    )?;
    Ok(Subscription {
        id: conn.last_insert_rowid(),
        principal_id,
        tier: tier.to_string(),
        price,
        payment_id,
        created_at,
        expires_at,
        notify_status: NotifyStatus::None,
    })
}

/// Fetch a subscription by id.
pub fn get(conn: &Connection, id: SubscriptionId) -> Result<Option<Subscription>> {
    let sql = format!("SELECT {COLUMNS} FROM subscriptions WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], from_row).optional()?)
}

/// The active subscription: latest `expires_at` still in the future, later
/// inserts winning ties.
pub fn active_for(
    conn: &Connection,
    principal_id: PrincipalId,
    now: u64,
) -> Result<Option<Subscription>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM subscriptions
         WHERE principal_id = ?1 AND expires_at > ?2
         ORDER BY expires_at DESC, id DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, rusqlite::params![principal_id, now as i64], from_row)
        .optional()?)
}

/// Every row for a principal, newest first.
pub fn history(conn: &Connection, principal_id: PrincipalId) -> Result<Vec<Subscription>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM subscriptions WHERE principal_id = ?1
         ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([principal_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Un-notified rows expiring within `(now, now + window]`.
pub fn due_for_warning(conn: &Connection, now: u64, window_secs: u64) -> Result<Vec<Subscription>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM subscriptions
         WHERE notify_status = 0 AND expires_at > ?1 AND expires_at <= ?2
         ORDER BY expires_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![now as i64, now.saturating_add(window_secs) as i64],
            from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Expired rows that have not received the expired notice.
pub fn due_for_expiry(conn: &Connection, now: u64) -> Result<Vec<Subscription>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM subscriptions
         WHERE expires_at <= ?1 AND notify_status <> 2
         ORDER BY expires_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([now as i64], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Raise `notify_status` to `status`. Never lowers it.
///
/// Returns `false` when the row was already at or past `status`.
pub fn advance_notify_status(
    conn: &Connection,
    id: SubscriptionId,
    status: NotifyStatus,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE subscriptions SET notify_status = ?2 WHERE id = ?1 AND notify_status < ?2",
        rusqlite::params![id, status as u8],
    )?;
    Ok(updated > 0)
}
