//! Ledger Engine
//!
//! The authoritative payment and balance ledger for a platform that sells premium subscriptions and holds a wallet
//! balance per user. Money arrives through external payment gateways or internal transfers, and every balance change
//! is an explicit transaction that is settled exactly once.
//!
//! The library is divided into these sections:
//! 1. The store contracts ([`mod@traits`]) and the SQLite backend that implements them ([`SqliteDatabase`]). You should
//!    never need to access the database directly. The data types it stores are public in [`mod@db_types`].
//! 2. The gateway adapter ([`mod@gateway`]), which normalizes every external gateway into a canonical outcome.
//! 3. The ledger public API ([`mod@ledger_api`]): the transaction engine, the reconciliation controller, the
//!    subscription state machine and the payment flow.
//!
//! The engine also emits events ([`mod@events`]) when transactions settle or are annulled, when subscriptions are
//! activated and when an operator alert is raised. Hooks can subscribe to these to perform custom actions.
pub mod db_types;
pub mod events;
pub mod gateway;
pub mod ledger_api;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use ledger_api::{
    ledger_objects,
    LedgerError,
    PaymentFlowApi,
    ReconciliationApi,
    SubscriptionApi,
    TransactionEngine,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    AccountManagement,
    ActivationResult,
    LedgerDatabase,
    LedgerDbError,
    LedgerTotals,
    SettleResult,
    SubscriptionManagement,
    TransitionResult,
};
