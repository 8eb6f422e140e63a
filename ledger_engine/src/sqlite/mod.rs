//! SQLite backend for the ledger store.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
