use ledger_common::Amount;
use serde::{Deserialize, Serialize};

use crate::db_types::{Account, Subscription, Transaction};

/// The result of a conditional `pending -> settled` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettleResult {
    /// This call won the transition. The balance delta has been applied and `account` is the post-settlement state.
    Settled { transaction: Transaction, account: Account },
    /// The transaction was already terminal. Nothing was changed.
    AlreadyResolved(Transaction),
}

impl SettleResult {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Settled { transaction, .. } => transaction,
            Self::AlreadyResolved(transaction) => transaction,
        }
    }
}

/// The result of a conditional `pending -> failed | cancelled` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionResult {
    Applied(Transaction),
    AlreadyResolved(Transaction),
}

impl TransitionResult {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Applied(tx) | Self::AlreadyResolved(tx) => tx,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub subscription: Subscription,
    /// True if an existing active subscription was extended rather than a new one created.
    pub extended: bool,
    /// True if the funding transaction had already been applied. Nothing was changed.
    pub already_applied: bool,
}

/// Sums of settled transactions for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub credits: Amount,
    pub debits: Amount,
}

impl LedgerTotals {
    pub fn net(&self) -> Amount {
        self.credits - self.debits
    }
}
