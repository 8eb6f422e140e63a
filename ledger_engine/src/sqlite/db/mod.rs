//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interactions are simple functions (rather than stateful structs) that accept a `&mut SqliteConnection`
//! argument. Callers can obtain a connection from a pool, or open an atomic transaction as the need arises and call
//! through to the functions without any other changes.
//!
//! SQLite allows a single writer at a time. Every atomic unit in [`super::SqliteDatabase`] issues a write as its
//! first statement, so the write lock is taken when the unit starts and concurrent units queue on the busy timeout
//! instead of failing on a read-to-write lock upgrade.
//!
//! Write statements with a `RETURNING` clause are always drained with `fetch_all`. A statement that is abandoned after
//! its first row is never reset, and SQLite keeps its write open until the connection runs something else.
use std::{env, str::FromStr, time::Duration};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::traits::LedgerDbError;

pub mod accounts;
pub mod alerts;
pub mod subscriptions;
pub mod transactions;

const SQLITE_DB_URL: &str = "sqlite://data/ledger.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(15);

pub fn db_url() -> String {
    let result = env::var("LEDGER_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ LEDGER_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, LedgerDbError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

/// Maps a unique-constraint violation to `on_conflict`, and anything else to a generic database error.
pub(crate) fn map_unique_violation(e: sqlx::Error, on_conflict: LedgerDbError) -> LedgerDbError {
    match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => on_conflict,
        _ => LedgerDbError::from(e),
    }
}
