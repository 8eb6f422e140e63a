//! `SqliteDatabase` is a concrete implementation of a ledger store backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use ledger_common::Amount;
use log::*;
use serde_json::json;
use sqlx::SqlitePool;

use super::db::{accounts, alerts, db_url, new_pool, subscriptions, transactions};
use crate::{
    db_types::{
        Account,
        Direction,
        GatewayKind,
        GatewayRef,
        LedgerAlert,
        NewLedgerAlert,
        NewTransaction,
        PlanType,
        Subscription,
        SubscriptionStatus,
        Transaction,
        TransactionKind,
        TransactionStatus,
    },
    traits::{
        AccountManagement,
        ActivationResult,
        LedgerDatabase,
        LedgerDbError,
        LedgerTotals,
        SettleResult,
        SubscriptionManagement,
        TransitionResult,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl LedgerDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn fetch_or_create_account(&self, user_id: &str) -> Result<Account, LedgerDbError> {
        let mut tx = self.pool.begin().await?;
        let account = accounts::fetch_or_create(user_id, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn insert_transaction(&self, transaction: NewTransaction) -> Result<Transaction, LedgerDbError> {
        if !transaction.amount.is_positive() {
            return Err(LedgerDbError::InvalidAmount(transaction.amount));
        }
        let mut db_tx = self.pool.begin().await?;
        let tx = transactions::insert(transaction, Utc::now(), &mut db_tx).await?;
        db_tx.commit().await?;
        debug!("🗃️ Transaction #{} ({}, {}) saved as pending with ref {}", tx.id, tx.kind, tx.amount, tx.gateway_ref);
        Ok(tx)
    }

    /// In a single atomic transaction:
    /// * the status moves from `pending` to `settled` with a conditional update. If zero rows change, another caller
    ///   got there first, and we return the terminal transaction as-is.
    /// * the balance delta is applied. A debit that the balance cannot cover aborts the whole unit.
    async fn settle_transaction(&self, id: i64) -> Result<SettleResult, LedgerDbError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let Some(transaction) = transactions::mark_settled(id, now, &mut tx).await? else {
            let existing = transactions::fetch_by_id(id, &mut tx).await?.ok_or(LedgerDbError::TransactionNotFound(id))?;
            debug!("🗃️ Transaction #{id} is already {}. Nothing to settle.", existing.status);
            return Ok(SettleResult::AlreadyResolved(existing));
        };
        let account = match transaction.kind.direction() {
            Direction::Credit => accounts::credit(transaction.account_id, transaction.amount, now, &mut tx).await?,
            Direction::Debit => accounts::debit(transaction.account_id, transaction.amount, now, &mut tx).await?,
        };
        tx.commit().await?;
        debug!(
            "🗃️ Transaction #{id} settled. Account #{} balance is now {}",
            account.id, account.balance
        );
        Ok(SettleResult::Settled { transaction, account })
    }

    async fn annul_transaction(
        &self,
        id: i64,
        status: TransactionStatus,
        reason: Option<&str>,
    ) -> Result<TransitionResult, LedgerDbError> {
        if !matches!(status, TransactionStatus::Failed | TransactionStatus::Cancelled) {
            return Err(LedgerDbError::DatabaseError(format!("Cannot annul a transaction to status {status}")));
        }
        let mut tx = self.pool.begin().await?;
        let result = match transactions::mark_annulled(id, status, reason, Utc::now(), &mut tx).await? {
            Some(annulled) => {
                debug!("🗃️ Transaction #{id} is now {status}");
                TransitionResult::Applied(annulled)
            },
            None => {
                let existing =
                    transactions::fetch_by_id(id, &mut tx).await?.ok_or(LedgerDbError::TransactionNotFound(id))?;
                TransitionResult::AlreadyResolved(existing)
            },
        };
        tx.commit().await?;
        Ok(result)
    }

    async fn request_cancel(&self, id: i64) -> Result<Transaction, LedgerDbError> {
        let mut tx = self.pool.begin().await?;
        let transaction = match transactions::set_cancel_requested(id, Utc::now(), &mut tx).await? {
            Some(flagged) => flagged,
            None => transactions::fetch_by_id(id, &mut tx).await?.ok_or(LedgerDbError::TransactionNotFound(id))?,
        };
        tx.commit().await?;
        Ok(transaction)
    }

    /// The debit runs first, so the write lock is taken immediately and an uncovered transfer aborts before anything
    /// else is written.
    async fn transfer(
        &self,
        from_account: i64,
        to_account: i64,
        amount: Amount,
        currency: &str,
    ) -> Result<(Transaction, Transaction), LedgerDbError> {
        if !amount.is_positive() {
            return Err(LedgerDbError::InvalidAmount(amount));
        }
        if from_account == to_account {
            return Err(LedgerDbError::SelfTransfer(from_account));
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        accounts::debit(from_account, amount, now, &mut tx).await?;
        accounts::credit(to_account, amount, now, &mut tx).await?;
        let outgoing = NewTransaction::new(from_account, TransactionKind::TransferOut, amount, currency, GatewayKind::Internal)
            .with_metadata(json!({ "counterparty_account": to_account }));
        let incoming = NewTransaction::new(to_account, TransactionKind::TransferIn, amount, currency, GatewayKind::Internal)
            .with_metadata(json!({ "counterparty_account": from_account }));
        let mut pair = Vec::with_capacity(2);
        for new_tx in [outgoing, incoming] {
            let pending = transactions::insert(new_tx, now, &mut tx).await?;
            let settled = transactions::mark_settled(pending.id, now, &mut tx)
                .await?
                .ok_or(LedgerDbError::TransactionNotFound(pending.id))?;
            pair.push(settled);
        }
        tx.commit().await?;
        debug!("🗃️ Transferred {amount} from account #{from_account} to account #{to_account}");
        let incoming = pair.pop().ok_or(LedgerDbError::DatabaseError("transfer pair is incomplete".into()))?;
        let outgoing = pair.pop().ok_or(LedgerDbError::DatabaseError("transfer pair is incomplete".into()))?;
        Ok((outgoing, incoming))
    }

    async fn fetch_stale_pending_transactions(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let txs = transactions::fetch_stale_pending(created_before, &mut conn).await?;
        Ok(txs)
    }

    async fn record_alert(&self, alert: NewLedgerAlert) -> Result<LedgerAlert, LedgerDbError> {
        let mut tx = self.pool.begin().await?;
        let alert = alerts::insert(alert, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(alert)
    }

    async fn acknowledge_alert(&self, id: i64) -> Result<Option<LedgerAlert>, LedgerDbError> {
        let mut tx = self.pool.begin().await?;
        let alert = alerts::acknowledge(id, &mut tx).await?;
        tx.commit().await?;
        Ok(alert)
    }

    async fn close(&mut self) -> Result<(), LedgerDbError> {
        self.pool.close().await;
        Ok(())
    }
}

impl AccountManagement for SqliteDatabase {
    async fn fetch_account(&self, account_id: i64) -> Result<Option<Account>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let account = accounts::fetch_account(account_id, &mut conn).await?;
        Ok(account)
    }

    async fn fetch_account_for_user(&self, user_id: &str) -> Result<Option<Account>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let account = accounts::fetch_account_for_user(user_id, &mut conn).await?;
        Ok(account)
    }

    async fn fetch_transaction(&self, id: i64) -> Result<Option<Transaction>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let tx = transactions::fetch_by_id(id, &mut conn).await?;
        Ok(tx)
    }

    async fn fetch_transaction_by_gateway_ref(
        &self,
        gateway_ref: &GatewayRef,
    ) -> Result<Option<Transaction>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let tx = transactions::fetch_by_gateway_ref(gateway_ref, &mut conn).await?;
        Ok(tx)
    }

    async fn fetch_transactions_for_account(&self, account_id: i64) -> Result<Vec<Transaction>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let txs = transactions::fetch_for_account(account_id, &mut conn).await?;
        Ok(txs)
    }

    async fn settled_totals(&self, account_id: i64) -> Result<LedgerTotals, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let totals = accounts::settled_totals(account_id, &mut conn).await?;
        Ok(totals)
    }

    async fn fetch_alerts(&self, include_acknowledged: bool) -> Result<Vec<LedgerAlert>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let alerts = alerts::fetch(include_acknowledged, &mut conn).await?;
        Ok(alerts)
    }
}

impl SubscriptionManagement for SqliteDatabase {
    /// Claiming the funding transaction is the first statement, which takes the write lock and makes the whole
    /// unit idempotent per funding transaction.
    async fn activate_subscription(
        &self,
        user_id: &str,
        plan: PlanType,
        duration_days: i64,
        funding_transaction_id: i64,
        now: DateTime<Utc>,
    ) -> Result<ActivationResult, LedgerDbError> {
        let mut tx = self.pool.begin().await?;
        let claimed = subscriptions::claim_funding(funding_transaction_id, now, &mut tx).await.map_err(|e| match e {
            sqlx::Error::Database(err) if err.is_foreign_key_violation() => {
                LedgerDbError::InvalidFundingTransaction(funding_transaction_id)
            },
            e => LedgerDbError::from(e),
        })?;
        if !claimed {
            let subscription = subscriptions::fetch_for_funding(funding_transaction_id, &mut tx)
                .await?
                .ok_or(LedgerDbError::InvalidFundingTransaction(funding_transaction_id))?;
            debug!("🗃️ Transaction #{funding_transaction_id} has already been applied to subscription #{}", subscription.id);
            return Ok(ActivationResult { subscription, extended: false, already_applied: true });
        }
        let funding = match transactions::fetch_by_id(funding_transaction_id, &mut tx).await? {
            Some(t) if t.kind == TransactionKind::SubscriptionPurchase && t.status == TransactionStatus::Settled => t,
            _ => return Err(LedgerDbError::InvalidFundingTransaction(funding_transaction_id)),
        };
        // The subscription must go to the user who paid for it.
        match accounts::fetch_account(funding.account_id, &mut tx).await? {
            Some(payer) if payer.user_id == user_id => {},
            _ => {
                warn!("🗃️ Transaction #{funding_transaction_id} was not paid by {user_id}. Refusing to activate.");
                return Err(LedgerDbError::InvalidFundingTransaction(funding_transaction_id));
            },
        }
        let (subscription, extended) = match subscriptions::fetch_active_for_user(user_id, &mut tx).await? {
            Some(active) if active.end_date >= now => {
                let extended = subscriptions::extend(active.id, plan, duration_days, now, &mut tx)
                    .await?
                    .ok_or(LedgerDbError::SubscriptionNotActive(active.id))?;
                (extended, true)
            },
            Some(lapsed) => {
                subscriptions::close(lapsed.id, SubscriptionStatus::Expired, now, &mut tx).await?;
                debug!("🗃️ Subscription #{} had lapsed before the sweep reached it. Expired it.", lapsed.id);
                let fresh =
                    subscriptions::insert(user_id, plan, duration_days, funding_transaction_id, now, &mut tx).await?;
                (fresh, false)
            },
            None => {
                let fresh =
                    subscriptions::insert(user_id, plan, duration_days, funding_transaction_id, now, &mut tx).await?;
                (fresh, false)
            },
        };
        subscriptions::link_funding(funding_transaction_id, subscription.id, &mut tx).await?;
        tx.commit().await?;
        Ok(ActivationResult { subscription, extended, already_applied: false })
    }

    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>, LedgerDbError> {
        let mut tx = self.pool.begin().await?;
        let expired = subscriptions::expire_due(now, &mut tx).await?;
        tx.commit().await?;
        Ok(expired)
    }

    async fn cancel_subscription(&self, id: i64, now: DateTime<Utc>) -> Result<Subscription, LedgerDbError> {
        let mut tx = self.pool.begin().await?;
        let Some(cancelled) = subscriptions::close(id, SubscriptionStatus::Cancelled, now, &mut tx).await? else {
            return match subscriptions::fetch_by_id(id, &mut tx).await? {
                Some(_) => Err(LedgerDbError::SubscriptionNotActive(id)),
                None => Err(LedgerDbError::SubscriptionNotFound(id)),
            };
        };
        tx.commit().await?;
        Ok(cancelled)
    }

    async fn fetch_subscription(&self, id: i64) -> Result<Option<Subscription>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let subscription = subscriptions::fetch_by_id(id, &mut conn).await?;
        Ok(subscription)
    }

    async fn fetch_active_subscription(&self, user_id: &str) -> Result<Option<Subscription>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let subscription = subscriptions::fetch_active_for_user(user_id, &mut conn).await?;
        Ok(subscription)
    }

    async fn fetch_subscription_for_funding(&self, transaction_id: i64) -> Result<Option<Subscription>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let subscription = subscriptions::fetch_for_funding(transaction_id, &mut conn).await?;
        Ok(subscription)
    }

    async fn fetch_subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>, LedgerDbError> {
        let mut conn = self.pool.acquire().await?;
        let subscriptions = subscriptions::fetch_for_user(user_id, &mut conn).await?;
        Ok(subscriptions)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL in `LEDGER_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, LedgerDbError> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, LedgerDbError> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date. Must run before the ledger starts serving requests.
    pub async fn migrate(&self) -> Result<(), LedgerDbError> {
        sqlx::migrate!("./src/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerDbError::DatabaseError(format!("Migration failed: {e}")))?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
