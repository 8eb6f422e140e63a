use std::time::Duration;

use ledger_common::Amount;
use thiserror::Error;

use crate::{
    db_types::{GatewayKind, GatewayRef, TransactionStatus},
    gateway::GatewayError,
    traits::LedgerDbError,
};

/// Errors surfaced by the ledger APIs.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Amounts must be positive, not {0}")]
    InvalidAmount(Amount),
    #[error("Account {0} does not exist")]
    AccountNotFound(i64),
    #[error("Transaction {0} does not exist")]
    TransactionNotFound(i64),
    #[error("Account {account_id} has insufficient funds. Balance {balance}, requested {requested}")]
    InsufficientFunds { account_id: i64, balance: Amount, requested: Amount },
    #[error("Gateway outcome for {gateway_ref} does not match the ledger: {detail}")]
    GatewayMismatch { gateway_ref: GatewayRef, detail: String },
    #[error("No transaction was ever initiated with gateway reference {0}")]
    UnknownTransaction(GatewayRef),
    #[error("Could not activate the subscription funded by transaction {transaction_id}: {reason}")]
    SubscriptionActivationFailed { transaction_id: i64, reason: String },
    #[error("The {gateway} gateway timed out after {timeout:?}. Transaction {transaction_id} is still pending.")]
    GatewayTimeout { transaction_id: i64, gateway: GatewayKind, timeout: Duration },
    #[error("Transaction {id} has already been resolved as {status}")]
    AlreadyResolved { id: i64, status: TransactionStatus },
    #[error("Gateway error: {error}")]
    Gateway { transaction_id: Option<i64>, error: GatewayError },
    #[error("Subscription {0} does not exist")]
    SubscriptionNotFound(i64),
    #[error("Subscription {0} is not active")]
    SubscriptionNotActive(i64),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl From<LedgerDbError> for LedgerError {
    fn from(e: LedgerDbError) -> Self {
        match e {
            LedgerDbError::DatabaseError(s) => Self::Database(s),
            LedgerDbError::AccountNotFound(id) => Self::AccountNotFound(id),
            LedgerDbError::TransactionNotFound(id) => Self::TransactionNotFound(id),
            LedgerDbError::DuplicateGatewayRef(r) => {
                Self::InvalidRequest(format!("Gateway reference {r} has already been used"))
            },
            LedgerDbError::InsufficientFunds { account_id, balance, requested } => {
                Self::InsufficientFunds { account_id, balance, requested }
            },
            LedgerDbError::InvalidAmount(a) => Self::InvalidAmount(a),
            LedgerDbError::SelfTransfer(id) => Self::InvalidRequest(format!("Cannot transfer from account {id} to itself")),
            LedgerDbError::SubscriptionNotFound(id) => Self::SubscriptionNotFound(id),
            LedgerDbError::SubscriptionNotActive(id) => Self::SubscriptionNotActive(id),
            LedgerDbError::InvalidFundingTransaction(id) => Self::SubscriptionActivationFailed {
                transaction_id: id,
                reason: "it is not a settled subscription purchase".into(),
            },
        }
    }
}

impl LedgerError {
    /// Wraps a gateway error raised while handling a transaction that is still pending.
    pub fn from_gateway(error: GatewayError, transaction_id: Option<i64>) -> Self {
        match (error, transaction_id) {
            (GatewayError::Timeout(gateway, timeout), Some(transaction_id)) => {
                Self::GatewayTimeout { transaction_id, gateway, timeout }
            },
            (error, transaction_id) => Self::Gateway { transaction_id, error },
        }
    }
}
