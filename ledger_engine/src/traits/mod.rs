//! #  Ledger store contracts
//!
//! This module defines the behaviour a storage backend must provide in order to act as the authoritative store for
//! the ledger. The engine APIs in [`crate::ledger_api`] are generic over these traits and never talk to a database
//! directly.
//!
//! ## Accounts and transactions
//! An account holds one user's wallet balance. Every change to that balance is a [`Transaction`] row that moves from
//! `pending` to exactly one terminal status. The backend is responsible for making each status transition a
//! *conditional* update (it only applies if the row is still pending), and for applying the balance delta of a
//! settlement in the same atomic unit as the status change.
//!
//! ## Traits
//! * [`LedgerDatabase`] is the highest level of behaviour: creating and resolving transactions, transfers and alerts.
//! * [`AccountManagement`] provides read-only queries over accounts, transactions and alerts.
//! * [`SubscriptionManagement`] stores subscription state and its transitions.
//!
//! [`Transaction`]: crate::db_types::Transaction
mod account_management;
mod data_objects;
mod ledger_database;
mod subscription_management;

pub use account_management::AccountManagement;
pub use data_objects::{ActivationResult, LedgerTotals, SettleResult, TransitionResult};
pub use ledger_database::{LedgerDatabase, LedgerDbError};
pub use subscription_management::SubscriptionManagement;
