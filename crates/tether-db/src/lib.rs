//! Database layer for Tether.
//!
//! Resolves a connection URI into a pooled SQLite [`Database`] handle
//! (via `r2d2`), and provides the directory-based migration [`Router`]
//! together with the static [`TableSchema`] descriptions it uses to
//! auto-generate migrations from model definitions.
//!
//! # Design decisions
//!
//! - **Two-phase initialisation**: configuration is parsed first, then a
//!   single [`Database`] is built and cloned into every dependent. There is
//!   no late-bound proxy.
//! - **In-memory databases keep one connection**: the pool for
//!   `sqlite:///:memory:` holds exactly one connection that is never
//!   recycled, so data survives between checkouts.
//! - **Per-migration transactions**: each migration and its history row
//!   commit together.

mod migrations;
mod pool;
mod schema;

pub use migrations::{MigrationError, MigrationScript, Router, HISTORY_TABLE};
pub use pool::{
    create_pool, ConnectHook, ConnectionParams, Database, DatabaseError, DatabaseUri, DbConnection,
    DbPool, DEFAULT_DATABASE_URI,
};
pub use schema::{diff_schema, ColumnDef, SchemaDiff, TableSchema};
