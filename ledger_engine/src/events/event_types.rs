use serde::{Deserialize, Serialize};

use crate::db_types::{Account, LedgerAlert, Subscription, Transaction, TransactionStatus};

/// A transaction moved to `settled` and its balance delta was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSettledEvent {
    pub transaction: Transaction,
    /// The account state straight after settlement.
    pub account: Account,
}

impl TransactionSettledEvent {
    pub fn new(transaction: Transaction, account: Account) -> Self {
        Self { transaction, account }
    }
}

/// A transaction moved to `failed` or `cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAnnulledEvent {
    pub transaction: Transaction,
    pub status: TransactionStatus,
}

impl TransactionAnnulledEvent {
    pub fn new(transaction: Transaction) -> Self {
        let status = transaction.status;
        Self { transaction, status }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionActivatedEvent {
    pub subscription: Subscription,
    pub extended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAlertEvent {
    pub alert: LedgerAlert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    TransactionSettled(TransactionSettledEvent),
    TransactionAnnulled(TransactionAnnulledEvent),
    SubscriptionActivated(SubscriptionActivatedEvent),
    OperatorAlert(OperatorAlertEvent),
}
