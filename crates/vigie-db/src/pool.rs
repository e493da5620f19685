//! SQLite pool for the vigilance service.
//!
//! Every part of the service that touches durable state — subscriber
//! records, vigilance levels, the delivery log — goes through this pool.
//! Connections come up in WAL mode with foreign keys on, so the feed
//! poller can write transitions while API handlers read subscriber state.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// Pool handle shared by the server, scheduler, and broadcaster.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors raised while bringing the pool up.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to build sqlite pool: {0}")]
    Build(#[from] r2d2::Error),
}

/// Opens (creating if needed) the vigilance database and wraps it in a
/// pool of `settings.pool_max_size` connections.
///
/// `db_path` may be `:memory:`, which the tests use; note that with a
/// pool each in-memory connection is its own private database.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| init_connection(conn, settings.busy_timeout_ms));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    Ok(pool)
}

/// Per-connection setup run by the manager before a connection joins the
/// pool: WAL journal, foreign keys, busy timeout.
fn init_connection(conn: &mut Connection, busy_timeout_ms: u64) -> Result<(), rusqlite::Error> {
    // journal_mode is the one pragma that can silently refuse; read back
    // what SQLite actually picked. In-memory databases answer "memory".
    let journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal_mode WAL refused, got {journal_mode}")),
        ));
    }

    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", busy_timeout_ms)?;
    Ok(())
}
