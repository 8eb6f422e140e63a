//! # Ledger public API
//!
//! Every API is generic over a store backend that implements [`LedgerDatabase`], and those that talk to the outside
//! world are also generic over a [`PaymentGateway`]. Callers never touch the store directly.
//!
//! * [`TransactionEngine`] creates transactions and is the only thing that moves balances.
//! * [`ReconciliationApi`] turns gateway callbacks and status queries into exactly one terminal transition per
//!   transaction, and activates subscriptions that were paid for.
//! * [`SubscriptionApi`] derives premium status and runs the expiry sweep.
//! * [`PaymentFlowApi`] records a pending transaction and opens a payment session at a gateway.
//!
//! ```rust,ignore
//! use ledger_engine::{events::EventProducers, SqliteDatabase, TransactionEngine};
//! let db = SqliteDatabase::new_with_url("sqlite://data/ledger.db", 5).await?;
//! let engine = TransactionEngine::new(db, EventProducers::default());
//! let account = engine.open_account("alice").await?;
//! ```
//!
//! [`LedgerDatabase`]: crate::traits::LedgerDatabase
//! [`PaymentGateway`]: crate::gateway::PaymentGateway
mod errors;
pub mod ledger_objects;
mod payment_flow_api;
mod reconciliation_api;
mod subscription_api;
mod transaction_engine;

pub use errors::LedgerError;
pub use payment_flow_api::PaymentFlowApi;
pub use reconciliation_api::ReconciliationApi;
pub use subscription_api::SubscriptionApi;
pub use transaction_engine::TransactionEngine;
