//! Database layer for the vigie platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. Every table — subscribers, vigilance state,
//! and the alert delivery log — is created through versioned migrations
//! managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single-server deployment needs no external
//!   database process. WAL allows concurrent readers with a single writer,
//!   which matches the access pattern: many API reads, serialized lifecycle
//!   writes, one scheduler writer for vigilance state.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, ensuring migrations ship with the server and cannot
//!   drift from the code that depends on them.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
