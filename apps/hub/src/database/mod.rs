//! Persistence layer for the hub.
//!
//! Everything durable lives here: monitored websites, validator
//! identities, the append-only probe tick log, and historical uptime
//! rollups. The `Database` trait is the seam the rest of the hub
//! programs against; the libsql implementation is in `repository`.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema.
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
