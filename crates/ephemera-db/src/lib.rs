//! # ephemera-db
//!
//! Database access layer for the Ephemera daemon.
//! Manages the single SQLite database at `$EPHEMERA_DATA_DIR/ephemera.db`.
//!
//! ## Schema
//!
//! - WAL mode mandatory
//! - Foreign keys enforced
//! - All timestamps are Unix epoch seconds
//! - Schema version stored in `PRAGMA user_version`
//!
//! Query functions take a plain `&Connection`. Services share one connection
//! through [`SharedConnection`] and lock it only for the duration of a single
//! query or transaction.

pub mod migrations;
pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use ephemera_types::{ConflictKind, ServiceError};
use rusqlite::{Connection, ErrorCode};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Connection handle shared between services.
pub type SharedConnection = Arc<tokio::sync::Mutex<Connection>>;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Busy or locked database; the statement may succeed if repeated.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }

    /// A UNIQUE/CHECK/FOREIGN KEY guard rejected the write.
    pub fn is_constraint(&self) -> bool {
        match self {
            DbError::Constraint(_) => true,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        if err.is_busy() {
            return ServiceError::Dependency(err.to_string());
        }
        if err.is_constraint() {
            return ServiceError::Conflict(ConflictKind::ConcurrentModification(err.to_string()));
        }
        match err {
            DbError::NotFound(what) => ServiceError::NotFound {
                entity: "record",
                id: what,
            },
            other => {
                tracing::error!(error = %other, "storage failure");
                ServiceError::TransientDependency {
                    operation: "storage".to_string(),
                    attempts: 1,
                }
            }
        }
    }
}

/// Open or create the Ephemera database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Wrap a connection for sharing between services.
pub fn shared(conn: Connection) -> SharedConnection {
    Arc::new(tokio::sync::Mutex::new(conn))
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}
