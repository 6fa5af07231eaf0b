//! Pending payment query functions.
//!
//! Every status-changing statement is conditional on the row still being
//! open (`initiated` or `awaiting_proof`), so a terminal payment can never be
//! mutated again no matter how requests interleave.

use ephemera_types::billing::{PaymentStatus, PendingPayment};
use ephemera_types::{PaymentId, PrincipalId};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::Result;

const COLUMNS: &str = "id, principal_id, tier, price, days_valid, status, proof_ref,
                       decided_by, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<PendingPayment> {
    let status: String = row.get(5)?;
    let status = PaymentStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(5, Type::Text, "unknown payment status".into())
    })?;
    Ok(PendingPayment {
        id: row.get(0)?,
        principal_id: row.get(1)?,
        tier: row.get(2)?,
        price: row.get::<_, i64>(3)? as u64,
        days_valid: row.get::<_, i64>(4)? as u32,
        status,
        proof_ref: row.get(6)?,
        decided_by: row.get(7)?,
        created_at: row.get::<_, i64>(8)? as u64,
        updated_at: row.get::<_, i64>(9)? as u64,
    })
}

/// Create a payment in `initiated` state.
///
/// Fails with a constraint violation if the principal already has an open
/// payment.
pub fn insert(
    conn: &Connection,
    principal_id: PrincipalId,
    tier: &str,
    price: u64,
    days_valid: u32,
    now: u64,
) -> Result<PendingPayment> {
    conn.execute(
        "INSERT INTO pending_payments
         (principal_id, tier, price, days_valid, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'initiated', ?5, ?5)",
        rusqlite::params![
            principal_id,
            tier,
            price as i64,
            i64::from(days_valid),
            now as i64,
        ],
    )?;
    Ok(PendingPayment {
        id: conn.last_insert_rowid(),
        principal_id,
        tier: tier.to_string(),
        price,
        days_valid,
        status: PaymentStatus::Initiated,
        proof_ref: None,
        decided_by: None,
        created_at: now,
        updated_at: now,
    })
}

/// Fetch a payment by id.
pub fn get(conn: &Connection, id: PaymentId) -> Result<Option<PendingPayment>> {
    let sql = format!("SELECT {COLUMNS} FROM pending_payments WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], from_row).optional()?)
}

/// The principal's open payment, if any.
pub fn open_for(conn: &Connection, principal_id: PrincipalId) -> Result<Option<PendingPayment>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM pending_payments
         WHERE principal_id = ?1 AND status IN ('initiated', 'awaiting_proof')
         ORDER BY id DESC LIMIT 1"
    );
    Ok(conn.query_row(&sql, [principal_id], from_row).optional()?)
}

/// The principal's most recent payment in any state.
pub fn latest_for(conn: &Connection, principal_id: PrincipalId) -> Result<Option<PendingPayment>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM pending_payments
         WHERE principal_id = ?1 ORDER BY id DESC LIMIT 1"
    );
    Ok(conn.query_row(&sql, [principal_id], from_row).optional()?)
}

/// Store the proof and move to `awaiting_proof`.
///
/// Returns `false` when the payment is missing or already terminal.
pub fn attach_proof(conn: &Connection, id: PaymentId, proof_ref: &str, now: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE pending_payments
         SET proof_ref = ?2, status = 'awaiting_proof', updated_at = ?3
         WHERE id = ?1 AND status IN ('initiated', 'awaiting_proof')",
        rusqlite::params![id, proof_ref, now as i64],
    )?;
    Ok(updated > 0)
}

/// Move an open payment to a terminal status.
///
/// Returns `false` when the payment is missing or already terminal.
pub fn mark_decided(
    conn: &Connection,
    id: PaymentId,
    status: PaymentStatus,
    operator_id: PrincipalId,
    now: u64,
) -> Result<bool> {
    debug_assert!(status.is_terminal());
    let updated = conn.execute(
        "UPDATE pending_payments
         SET status = ?2, decided_by = ?3, updated_at = ?4
         WHERE id = ?1 AND status IN ('initiated', 'awaiting_proof')",
        rusqlite::params![id, status.as_str(), operator_id, now as i64],
    )?;
    Ok(updated > 0)
}

/// List payments waiting for an operator decision, oldest first.
pub fn awaiting_decision(conn: &Connection, limit: u32) -> Result<Vec<PendingPayment>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM pending_payments
         WHERE status = 'awaiting_proof' ORDER BY updated_at ASC, id ASC LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([limit], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
