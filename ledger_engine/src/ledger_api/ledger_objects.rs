use chrono::{DateTime, Utc};
use ledger_common::Amount;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Account, Subscription, Transaction},
    gateway::PaymentSession,
};

/// How a reconcile call was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// This call performed the terminal transition.
    Applied,
    /// The transaction was already terminal. The recorded result is returned unchanged.
    Replayed,
}

/// Non-fatal issues raised while reconciling. The transaction result stands regardless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ReconcileWarning {
    /// Money is settled but the subscription it paid for was not granted. Retry out-of-band.
    SubscriptionActivationFailed { transaction_id: i64, reason: String },
    /// The user asked to cancel, but the gateway reported success first.
    CancelRequestOverridden { transaction_id: i64 },
    /// A replayed callback reports a different outcome from the one recorded.
    ConflictingReplay { transaction_id: i64, reported: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub transaction: Transaction,
    pub account: Option<Account>,
    pub disposition: Disposition,
    /// The subscription created or extended by this transaction, if it funded one.
    pub subscription: Option<Subscription>,
    pub warnings: Vec<ReconcileWarning>,
}

impl ReconcileResult {
    pub fn new(transaction: Transaction, account: Option<Account>, disposition: Disposition) -> Self {
        Self { transaction, account, disposition, subscription: None, warnings: vec![] }
    }

    pub fn was_applied(&self) -> bool {
        self.disposition == Disposition::Applied
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: usize,
    pub resolved: usize,
    pub still_pending: usize,
    pub errors: usize,
}

/// Compares an account's stored balance with the sum of its settled transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub account_id: i64,
    pub user_id: String,
    pub balance: Amount,
    pub settled_credits: Amount,
    pub settled_debits: Amount,
    pub pending_transactions: usize,
}

impl AuditReport {
    pub fn expected_balance(&self) -> Amount {
        self.settled_credits - self.settled_debits
    }

    pub fn is_consistent(&self) -> bool {
        self.balance == self.expected_balance()
    }
}

/// What the `subscription/status` endpoint reports for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatusView {
    pub user_id: String,
    pub is_premium: bool,
    pub subscription: Option<Subscription>,
    pub days_remaining: i64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiation {
    pub transaction: Transaction,
    pub session: PaymentSession,
}
