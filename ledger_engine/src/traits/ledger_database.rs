use chrono::{DateTime, Utc};
use ledger_common::Amount;
use thiserror::Error;

use crate::{
    db_types::{Account, GatewayRef, LedgerAlert, NewLedgerAlert, NewTransaction, Transaction, TransactionStatus},
    traits::{
        data_objects::{SettleResult, TransitionResult},
        AccountManagement,
        SubscriptionManagement,
    },
};

/// This trait defines the highest level of behaviour for ledger store backends.
///
/// Every method is one atomic unit against the store: it either completes, or leaves no trace.
#[allow(async_fn_in_trait)]
pub trait LedgerDatabase: Clone + AccountManagement + SubscriptionManagement {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Fetches the account for `user_id`, creating an empty one if it does not exist yet.
    async fn fetch_or_create_account(&self, user_id: &str) -> Result<Account, LedgerDbError>;

    /// Stores a new `pending` transaction.
    ///
    /// Fails with `AccountNotFound` if the account does not exist, `InvalidAmount` if the amount is not positive and
    /// `DuplicateGatewayRef` if the correlation id has been used before.
    async fn insert_transaction(&self, transaction: NewTransaction) -> Result<Transaction, LedgerDbError>;

    /// Conditionally moves the transaction from `pending` to `settled` and, in the same atomic unit, applies its
    /// balance delta to the owning account.
    ///
    /// * If the transaction is not pending, nothing changes and `AlreadyResolved` is returned.
    /// * If the transaction is a debit and the balance is too low, the whole unit is rolled back and
    ///   `InsufficientFunds` is returned. The transaction stays pending.
    async fn settle_transaction(&self, id: i64) -> Result<SettleResult, LedgerDbError>;

    /// Conditionally moves the transaction from `pending` to `failed` or `cancelled`. Balances are not touched.
    async fn annul_transaction(
        &self,
        id: i64,
        status: TransactionStatus,
        reason: Option<&str>,
    ) -> Result<TransitionResult, LedgerDbError>;

    /// Flags a pending transaction as cancel-requested. The status is not changed.
    /// Returns the transaction as it is after the call (terminal transactions are returned untouched).
    async fn request_cancel(&self, id: i64) -> Result<Transaction, LedgerDbError>;

    /// Moves `amount` between two accounts as a settled `transfer_out`/`transfer_in` pair in one atomic unit.
    async fn transfer(
        &self,
        from_account: i64,
        to_account: i64,
        amount: Amount,
        currency: &str,
    ) -> Result<(Transaction, Transaction), LedgerDbError>;

    /// Pending transactions routed through an external gateway that were created before `created_before`.
    async fn fetch_stale_pending_transactions(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, LedgerDbError>;

    async fn record_alert(&self, alert: NewLedgerAlert) -> Result<LedgerAlert, LedgerDbError>;

    async fn acknowledge_alert(&self, id: i64) -> Result<Option<LedgerAlert>, LedgerDbError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), LedgerDbError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerDbError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("The requested account id {0} does not exist")]
    AccountNotFound(i64),
    #[error("The requested transaction id {0} does not exist")]
    TransactionNotFound(i64),
    #[error("A transaction with gateway reference {0} already exists")]
    DuplicateGatewayRef(GatewayRef),
    #[error("Account {account_id} has insufficient funds. Balance {balance}, requested {requested}")]
    InsufficientFunds { account_id: i64, balance: Amount, requested: Amount },
    #[error("Amounts must be positive, not {0}")]
    InvalidAmount(Amount),
    #[error("Cannot transfer from account {0} to itself")]
    SelfTransfer(i64),
    #[error("The requested subscription id {0} does not exist")]
    SubscriptionNotFound(i64),
    #[error("Subscription {0} is not active")]
    SubscriptionNotActive(i64),
    #[error("Funding transaction {0} is not a settled subscription purchase")]
    InvalidFundingTransaction(i64),
}

impl From<sqlx::Error> for LedgerDbError {
    fn from(e: sqlx::Error) -> Self {
        LedgerDbError::DatabaseError(e.to_string())
    }
}
