//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Content registry
-- ============================================================

CREATE TABLE IF NOT EXISTS content_tokens (
    token TEXT PRIMARY KEY,
    payload_ref TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- ============================================================
-- Free-tier usage
-- ============================================================

CREATE TABLE IF NOT EXISTS view_counters (
    principal_id INTEGER PRIMARY KEY,
    count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
    updated_at INTEGER NOT NULL
);

-- ============================================================
-- Payments & subscriptions
-- ============================================================

CREATE TABLE IF NOT EXISTS pending_payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    principal_id INTEGER NOT NULL,
    tier TEXT NOT NULL,
    price INTEGER NOT NULL,
    days_valid INTEGER NOT NULL CHECK (days_valid > 0),
    status TEXT NOT NULL DEFAULT 'initiated'
        CHECK (status IN ('initiated', 'awaiting_proof', 'approved', 'rejected')),
    proof_ref TEXT,
    decided_by INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- At most one open payment per principal.
CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_payments_open
    ON pending_payments(principal_id)
    WHERE status IN ('initiated', 'awaiting_proof');

CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    principal_id INTEGER NOT NULL,
    tier TEXT NOT NULL,
    price INTEGER NOT NULL,
    payment_id INTEGER UNIQUE REFERENCES pending_payments(id),
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    notify_status INTEGER NOT NULL DEFAULT 0 CHECK (notify_status BETWEEN 0 AND 2)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_principal
    ON subscriptions(principal_id, expires_at);
CREATE INDEX IF NOT EXISTS idx_subscriptions_lifecycle
    ON subscriptions(notify_status, expires_at);

-- ============================================================
-- Revocation deadlines
-- ============================================================

CREATE TABLE IF NOT EXISTS scheduled_revocations (
    destination INTEGER NOT NULL,
    item_id INTEGER NOT NULL,
    armed_at INTEGER NOT NULL,
    fire_at INTEGER NOT NULL,
    PRIMARY KEY (destination, item_id)
);

CREATE INDEX IF NOT EXISTS idx_scheduled_revocations_fire_at
    ON scheduled_revocations(fire_at);
"#;
