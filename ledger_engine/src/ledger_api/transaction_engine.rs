//! The only component allowed to change balances.
//!
//! Every operation here is a thin policy layer over one atomic unit in the [`LedgerDatabase`]. The engine validates
//! requests before anything is written, translates store errors into [`LedgerError`]s, logs, and notifies event
//! subscribers after the unit has committed.
use std::fmt::Debug;

use ledger_common::{Amount, DEFAULT_CURRENCY_CODE};
use log::*;
use serde_json::{json, Value};

use crate::{
    db_types::{
        Account,
        GatewayKind,
        NewTransaction,
        Transaction,
        TransactionKind,
        TransactionStatus,
    },
    events::{EventProducers, TransactionAnnulledEvent, TransactionSettledEvent},
    ledger_api::{ledger_objects::AuditReport, LedgerError},
    traits::{LedgerDatabase, LedgerDbError, SettleResult, TransitionResult},
};

pub struct TransactionEngine<B> {
    db: B,
    producers: EventProducers,
    currency: String,
}

impl<B: Debug> Debug for TransactionEngine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransactionEngine ({:?}, {})", self.db, self.currency)
    }
}

impl<B: Clone> Clone for TransactionEngine<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), producers: self.producers.clone(), currency: self.currency.clone() }
    }
}

impl<B> TransactionEngine<B>
where B: LedgerDatabase
{
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers, currency: DEFAULT_CURRENCY_CODE.to_string() }
    }

    /// Sets the currency recorded on new transactions.
    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.trim().to_ascii_uppercase();
        self
    }

    pub fn currency(&self) -> &str {
        self.currency.as_str()
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub async fn open_account(&self, user_id: &str) -> Result<Account, LedgerError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(LedgerError::InvalidRequest("A user id is required to open an account".into()));
        }
        let account = self.db.fetch_or_create_account(user_id).await?;
        trace!("💸 Account #{} is open for {user_id}", account.id);
        Ok(account)
    }

    pub async fn account(&self, account_id: i64) -> Result<Account, LedgerError> {
        self.db.fetch_account(account_id).await?.ok_or(LedgerError::AccountNotFound(account_id))
    }

    pub async fn account_for_user(&self, user_id: &str) -> Result<Option<Account>, LedgerError> {
        Ok(self.db.fetch_account_for_user(user_id).await?)
    }

    /// Creates a `pending` internal transaction.
    pub async fn initiate(
        &self,
        account_id: i64,
        kind: TransactionKind,
        amount: Amount,
        metadata: Option<Value>,
    ) -> Result<Transaction, LedgerError> {
        self.initiate_with_gateway(account_id, kind, amount, metadata, GatewayKind::Internal).await
    }

    /// Creates a `pending` transaction that will be resolved by `gateway`. Invalid amounts and unknown accounts are
    /// rejected before anything is written.
    pub async fn initiate_with_gateway(
        &self,
        account_id: i64,
        kind: TransactionKind,
        amount: Amount,
        metadata: Option<Value>,
        gateway: GatewayKind,
    ) -> Result<Transaction, LedgerError> {
        if !amount.is_positive() {
            debug!("💸 Rejecting {kind} for account #{account_id}: amount {amount} is not positive");
            return Err(LedgerError::InvalidAmount(amount));
        }
        if self.db.fetch_account(account_id).await?.is_none() {
            debug!("💸 Rejecting {kind} for account #{account_id}: no such account");
            return Err(LedgerError::AccountNotFound(account_id));
        }
        let mut new_tx = NewTransaction::new(account_id, kind, amount, &self.currency, gateway);
        if let Some(metadata) = metadata {
            new_tx = new_tx.with_metadata(metadata);
        }
        let tx = self.db.insert_transaction(new_tx).await?;
        info!("💸 Transaction #{} initiated: {kind} of {amount} {} for account #{account_id} via {gateway}", tx.id, tx.currency);
        Ok(tx)
    }

    /// Settles a pending transaction and returns the account after the balance change.
    ///
    /// Fails with `AlreadyResolved` if the transaction is terminal, and with `InsufficientFunds` if it is a debit the
    /// balance cannot cover. In both cases nothing changes.
    pub async fn settle(&self, transaction_id: i64) -> Result<Account, LedgerError> {
        match self.try_settle(transaction_id).await? {
            SettleResult::Settled { account, .. } => Ok(account),
            SettleResult::AlreadyResolved(tx) => Err(LedgerError::AlreadyResolved { id: tx.id, status: tx.status }),
        }
    }

    /// Like [`Self::settle`], but losing the race to a terminal status is reported as a result, not an error.
    pub async fn try_settle(&self, transaction_id: i64) -> Result<SettleResult, LedgerError> {
        let result = self.db.settle_transaction(transaction_id).await.map_err(|e| {
            if let LedgerDbError::InsufficientFunds { balance, requested, .. } = &e {
                info!("💸 Transaction #{transaction_id} cannot settle: balance {balance} does not cover {requested}");
            }
            LedgerError::from(e)
        })?;
        match &result {
            SettleResult::Settled { transaction, account } => {
                info!(
                    "💸 Transaction #{transaction_id} settled ({} {}). Account #{} balance is now {}",
                    transaction.kind, transaction.amount, account.id, account.balance
                );
                self.call_settled_hook(transaction, account).await;
            },
            SettleResult::AlreadyResolved(tx) => {
                debug!("💸 Transaction #{transaction_id} was already {}. Settle is a no-op.", tx.status);
            },
        }
        Ok(result)
    }

    pub async fn fail(&self, transaction_id: i64, reason: &str) -> Result<Transaction, LedgerError> {
        self.strict_annul(transaction_id, TransactionStatus::Failed, Some(reason)).await
    }

    pub async fn cancel(&self, transaction_id: i64) -> Result<Transaction, LedgerError> {
        self.strict_annul(transaction_id, TransactionStatus::Cancelled, None).await
    }

    async fn strict_annul(
        &self,
        transaction_id: i64,
        status: TransactionStatus,
        reason: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        match self.try_annul(transaction_id, status, reason).await? {
            TransitionResult::Applied(tx) => Ok(tx),
            TransitionResult::AlreadyResolved(tx) => Err(LedgerError::AlreadyResolved { id: tx.id, status: tx.status }),
        }
    }

    /// Moves a pending transaction to `failed` or `cancelled`. Balances are never touched.
    pub async fn try_annul(
        &self,
        transaction_id: i64,
        status: TransactionStatus,
        reason: Option<&str>,
    ) -> Result<TransitionResult, LedgerError> {
        let result = self.db.annul_transaction(transaction_id, status, reason).await?;
        match &result {
            TransitionResult::Applied(tx) => {
                info!("💸 Transaction #{transaction_id} is now {status}. {}", reason.unwrap_or_default());
                self.call_annulled_hook(tx).await;
            },
            TransitionResult::AlreadyResolved(tx) => {
                debug!("💸 Transaction #{transaction_id} was already {}. Not marking it {status}.", tx.status);
            },
        }
        Ok(result)
    }

    /// Records that the user wants to cancel a pending transaction. This is advisory: the status is decided by
    /// whichever gateway outcome arrives first.
    pub async fn request_cancel(&self, transaction_id: i64) -> Result<Transaction, LedgerError> {
        let tx = self.db.request_cancel(transaction_id).await?;
        if tx.is_terminal() {
            debug!("💸 Cancel requested for transaction #{transaction_id}, but it is already {}", tx.status);
        } else {
            info!("💸 Cancel requested for pending transaction #{transaction_id}");
        }
        Ok(tx)
    }

    /// Applies an operator or system adjustment: an internal transaction that is initiated and settled immediately.
    /// A debit the balance cannot cover is recorded as failed and reported as `InsufficientFunds`.
    pub async fn adjust_balance(
        &self,
        account_id: i64,
        kind: TransactionKind,
        amount: Amount,
        memo: &str,
    ) -> Result<Transaction, LedgerError> {
        let metadata = json!({ "memo": memo });
        let tx = self.initiate(account_id, kind, amount, Some(metadata)).await?;
        match self.try_settle(tx.id).await {
            Ok(SettleResult::Settled { transaction, .. }) => Ok(transaction),
            Ok(SettleResult::AlreadyResolved(t)) => Err(LedgerError::AlreadyResolved { id: t.id, status: t.status }),
            Err(e @ LedgerError::InsufficientFunds { .. }) => {
                self.try_annul(tx.id, TransactionStatus::Failed, Some("Insufficient funds")).await?;
                Err(e)
            },
            Err(e) => Err(e),
        }
    }

    /// Moves funds between two accounts. Both legs settle together or not at all.
    pub async fn transfer(
        &self,
        from_account: i64,
        to_account: i64,
        amount: Amount,
    ) -> Result<(Transaction, Transaction), LedgerError> {
        let (outgoing, incoming) = self.db.transfer(from_account, to_account, amount, &self.currency).await?;
        info!("💸 Transferred {amount} from account #{from_account} to account #{to_account}");
        for tx in [&outgoing, &incoming] {
            if let Some(account) = self.db.fetch_account(tx.account_id).await? {
                self.call_settled_hook(tx, &account).await;
            }
        }
        Ok((outgoing, incoming))
    }

    /// Recomputes the balance from the settled transactions and reports it next to the stored balance.
    pub async fn audit_account(&self, account_id: i64) -> Result<AuditReport, LedgerError> {
        let account = self.account(account_id).await?;
        let totals = self.db.settled_totals(account_id).await?;
        let pending = self
            .db
            .fetch_transactions_for_account(account_id)
            .await?
            .iter()
            .filter(|t| t.status == TransactionStatus::Pending)
            .count();
        let report = AuditReport {
            account_id,
            user_id: account.user_id,
            balance: account.balance,
            settled_credits: totals.credits,
            settled_debits: totals.debits,
            pending_transactions: pending,
        };
        if !report.is_consistent() {
            error!(
                "💸 Account #{account_id} balance is {}, but its settled transactions add up to {}",
                report.balance,
                report.expected_balance()
            );
        }
        Ok(report)
    }

    /// All transactions for the account, newest first.
    pub async fn history(&self, account_id: i64) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.db.fetch_transactions_for_account(account_id).await?)
    }

    async fn call_settled_hook(&self, transaction: &Transaction, account: &Account) {
        for emitter in &self.producers.transaction_settled_producer {
            trace!("💸 Notifying transaction settled hook subscribers");
            let event = TransactionSettledEvent::new(transaction.clone(), account.clone());
            emitter.publish_event(event).await;
        }
    }

    async fn call_annulled_hook(&self, transaction: &Transaction) {
        for emitter in &self.producers.transaction_annulled_producer {
            trace!("💸 Notifying transaction annulled hook subscribers");
            emitter.publish_event(TransactionAnnulledEvent::new(transaction.clone())).await;
        }
    }
}
