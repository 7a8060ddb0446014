//! wired-db: local key/value persistence for the terminal client.
//!
//! The tab layout snapshot is stored as a single JSON value under one key
//! and overwritten wholesale on each save, so every write is one atomic
//! upsert.

pub mod schema;
pub mod settings;

use rusqlite::Connection;
use std::path::Path;

pub fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    schema::initialize(&conn)?;
    Ok(conn)
}

/// Open a throwaway database, used by tests and ephemeral clients.
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    schema::initialize(&conn)?;
    Ok(conn)
}
