//! Resolves pending transactions from gateway outcomes, exactly once.
//!
//! Gateways may deliver the same outcome any number of times, in any order relative to the user's browser redirect,
//! and possibly concurrently. The controller never keeps state of its own. Correctness rests on two store properties:
//! * status transitions are conditional on the transaction still being `pending`, so only one caller can win, and
//! * the loser (or any later replay) reads back the terminal transaction and reports it without changing anything.
//!
//! Anomalies that need a human (unknown references, amount or currency mismatches, debits that bounce at settlement,
//! subscriptions that could not be granted) are written to the alert log and published to the operator alert hook.
use std::fmt::Debug;

use chrono::{Duration, Utc};
use futures_util::{stream, StreamExt};
use log::*;

use crate::{
    db_types::{
        AlertKind,
        GatewayKind,
        NewLedgerAlert,
        Transaction,
        TransactionKind,
        TransactionStatus,
    },
    events::{EventProducers, OperatorAlertEvent},
    gateway::{CanonicalOutcome, GatewayAdapter, GatewayError, PaymentGateway, PaymentOutcome},
    ledger_api::{
        ledger_objects::{Disposition, ReconcileResult, ReconcileWarning, SweepReport},
        LedgerError,
        SubscriptionApi,
        TransactionEngine,
    },
    traits::{ActivationResult, LedgerDatabase, SettleResult, TransitionResult},
};

/// How many gateway status queries a sweep runs at once.
const SWEEP_CONCURRENCY: usize = 4;

pub struct ReconciliationApi<B, G> {
    db: B,
    engine: TransactionEngine<B>,
    subscriptions: SubscriptionApi<B>,
    gateway: GatewayAdapter<G>,
    producers: EventProducers,
}

impl<B: Debug, G> Debug for ReconciliationApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi ({:?})", self.db)
    }
}

enum SweepItem {
    Resolved,
    StillPending,
    Failed,
}

impl<B, G> ReconciliationApi<B, G>
where
    B: LedgerDatabase,
    G: PaymentGateway,
{
    pub fn new(db: B, gateway: GatewayAdapter<G>, producers: EventProducers) -> Self {
        let engine = TransactionEngine::new(db.clone(), producers.clone());
        let subscriptions = SubscriptionApi::new(db.clone(), producers.clone());
        Self { db, engine, subscriptions, gateway, producers }
    }

    pub fn engine(&self) -> &TransactionEngine<B> {
        &self.engine
    }

    pub fn subscriptions(&self) -> &SubscriptionApi<B> {
        &self.subscriptions
    }

    pub fn gateway(&self) -> &GatewayAdapter<G> {
        &self.gateway
    }

    /// Applies a canonical gateway outcome to the transaction it refers to.
    ///
    /// 1. References the reporting gateway never issued are rejected with `UnknownTransaction`. A reference that
    ///    belongs to a different gateway counts as unknown. Nothing is created or changed.
    /// 2. Terminal transactions are reported as they are ([`Disposition::Replayed`]).
    /// 3. Pending transactions are settled, failed or cancelled. An outcome whose amount or currency disagrees with
    ///    the ledger fails the transaction instead, and is reported as `GatewayMismatch`.
    /// 4. A settled subscription purchase activates the subscription. If that fails the money stays settled and the
    ///    result carries a `SubscriptionActivationFailed` warning.
    pub async fn reconcile(&self, outcome: &CanonicalOutcome) -> Result<ReconcileResult, LedgerError> {
        let gateway_ref = &outcome.gateway_ref;
        let tx = match self.db.fetch_transaction_by_gateway_ref(gateway_ref).await? {
            Some(tx) if tx.gateway == outcome.gateway => tx,
            Some(tx) => {
                warn!(
                    "🔁 {} reported {} for {gateway_ref}, which was issued through {}. Discarding it.",
                    outcome.gateway, outcome.outcome, tx.gateway
                );
                let detail = format!(
                    "{} outcome for {} {} reported by {}, but the reference belongs to {}",
                    outcome.outcome, outcome.amount, outcome.currency, outcome.gateway, tx.gateway
                );
                let alert = NewLedgerAlert::new(AlertKind::UnknownTransaction, gateway_ref.clone(), detail)
                    .with_gateway(outcome.gateway);
                self.raise_alert(alert).await;
                return Err(LedgerError::UnknownTransaction(gateway_ref.clone()));
            },
            None => {
                warn!("🔁 {} outcome for unknown gateway reference {gateway_ref}. Discarding it.", outcome.outcome);
                let detail = format!("{} outcome for {} {}", outcome.outcome, outcome.amount, outcome.currency);
                let alert = NewLedgerAlert::new(AlertKind::UnknownTransaction, gateway_ref.clone(), detail)
                    .with_gateway(outcome.gateway);
                self.raise_alert(alert).await;
                return Err(LedgerError::UnknownTransaction(gateway_ref.clone()));
            },
        };
        if tx.is_terminal() {
            return self.replay(tx, Some(outcome)).await;
        }
        if let Err(mismatch) = self.gateway.check_against(outcome, &tx) {
            return self.reject_mismatch(tx, outcome, mismatch.to_string()).await;
        }
        debug!("🔁 Reconciling pending transaction #{} ({gateway_ref}) as {}", tx.id, outcome.outcome);
        match outcome.outcome {
            PaymentOutcome::Succeeded => self.settle_pending(tx, outcome).await,
            PaymentOutcome::Failed => {
                let reason = outcome.reason.as_deref().unwrap_or("Gateway reported the payment as failed");
                self.annul_pending(tx, TransactionStatus::Failed, Some(reason)).await
            },
            PaymentOutcome::Cancelled => {
                let reason = outcome.reason.as_deref().unwrap_or("Payment was cancelled at the gateway");
                self.annul_pending(tx, TransactionStatus::Cancelled, Some(reason)).await
            },
        }
    }

    /// The `payment/callback` path: authenticate and normalize a raw gateway callback, then reconcile it.
    pub async fn handle_callback(&self, gateway: GatewayKind, payload: &[u8]) -> Result<ReconcileResult, LedgerError> {
        let outcome = self.gateway.authenticate_callback(gateway, payload).await.map_err(|e| {
            match &e {
                GatewayError::Unconfirmed(r) => debug!("🔁 {gateway} callback for {r} is not final yet. Ignoring it."),
                e => warn!("🔁 Rejected {gateway} callback: {e}"),
            }
            LedgerError::from_gateway(e, None)
        })?;
        self.reconcile(&outcome).await
    }

    /// Re-queries the gateway for every external transaction that has been pending for longer than `min_age` and
    /// reconciles the ones that have a final answer. Timeouts and non-final answers leave the transaction pending.
    pub async fn sweep_pending(&self, min_age: Duration) -> Result<SweepReport, LedgerError> {
        let cutoff = Utc::now() - min_age;
        let stale = self.db.fetch_stale_pending_transactions(cutoff).await?;
        let mut report = SweepReport { examined: stale.len(), ..Default::default() };
        if stale.is_empty() {
            trace!("🔁 No stale pending transactions");
            return Ok(report);
        }
        info!("🔁 Sweeping {} pending transactions older than {}", stale.len(), cutoff);
        let results = stream::iter(stale)
            .map(|tx| self.sweep_one(tx))
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
        for item in results {
            match item {
                SweepItem::Resolved => report.resolved += 1,
                SweepItem::StillPending => report.still_pending += 1,
                SweepItem::Failed => report.errors += 1,
            }
        }
        info!(
            "🔁 Sweep complete. {} resolved, {} still pending, {} errors",
            report.resolved, report.still_pending, report.errors
        );
        Ok(report)
    }

    async fn sweep_one(&self, tx: Transaction) -> SweepItem {
        match self.gateway.query_status(tx.gateway, &tx.gateway_ref).await {
            Ok(Some(outcome)) => match self.reconcile(&outcome).await {
                Ok(_) => SweepItem::Resolved,
                Err(e) => {
                    warn!("🔁 Could not reconcile transaction #{} during the sweep: {e}", tx.id);
                    SweepItem::Failed
                },
            },
            Ok(None) => {
                debug!("🔁 {} has no final answer for transaction #{} yet", tx.gateway, tx.id);
                SweepItem::StillPending
            },
            Err(GatewayError::Timeout(..)) => SweepItem::StillPending,
            Err(e) => {
                warn!("🔁 Status query for transaction #{} failed: {e}", tx.id);
                SweepItem::Failed
            },
        }
    }

    /// Out-of-band retry for a settled subscription purchase whose activation failed.
    pub async fn retry_activation(&self, transaction_id: i64) -> Result<ActivationResult, LedgerError> {
        let tx =
            self.db.fetch_transaction(transaction_id).await?.ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        let result = self.subscriptions.activate_for_transaction(&tx).await?;
        if result.already_applied {
            info!("🔁 Transaction #{transaction_id} had already been applied to subscription #{}", result.subscription.id);
        } else {
            info!("🔁 Activation retry for transaction #{transaction_id} succeeded");
        }
        Ok(result)
    }

    /// Whatever the gateway reported, a disagreement on amount or currency fails the transaction.
    async fn reject_mismatch(
        &self,
        tx: Transaction,
        outcome: &CanonicalOutcome,
        detail: String,
    ) -> Result<ReconcileResult, LedgerError> {
        warn!("🔁 Gateway mismatch on a {} outcome for transaction #{}: {detail}. Failing it.", outcome.outcome, tx.id);
        let reason = format!("Gateway mismatch: {detail}");
        if let TransitionResult::AlreadyResolved(terminal) =
            self.engine.try_annul(tx.id, TransactionStatus::Failed, Some(&reason)).await?
        {
            debug!("🔁 Transaction #{} was resolved as {} before the mismatch was recorded", terminal.id, terminal.status);
        }
        let detail = format!("{} outcome: {detail}", outcome.outcome);
        self.raise_alert(NewLedgerAlert::for_transaction(AlertKind::GatewayMismatch, &tx, detail.clone())).await;
        Err(LedgerError::GatewayMismatch { gateway_ref: tx.gateway_ref, detail })
    }

    async fn settle_pending(&self, tx: Transaction, outcome: &CanonicalOutcome) -> Result<ReconcileResult, LedgerError> {
        let (settled, account) = match self.engine.try_settle(tx.id).await {
            Ok(SettleResult::Settled { transaction, account }) => (transaction, account),
            Ok(SettleResult::AlreadyResolved(terminal)) => return self.replay(terminal, Some(outcome)).await,
            Err(e @ LedgerError::InsufficientFunds { .. }) => {
                warn!("🔁 Transaction #{} was confirmed by the gateway but cannot be settled: {e}", tx.id);
                self.engine.try_annul(tx.id, TransactionStatus::Failed, Some("Insufficient funds at settlement")).await?;
                self.raise_alert(NewLedgerAlert::for_transaction(AlertKind::InsufficientFunds, &tx, e.to_string())).await;
                return Err(e);
            },
            Err(e) => return Err(e),
        };
        let mut result = ReconcileResult::new(settled, Some(account), Disposition::Applied);
        if result.transaction.cancel_requested {
            info!(
                "🔁 Transaction #{} settled although the user had asked to cancel it. The gateway outcome wins.",
                result.transaction.id
            );
            result.warnings.push(ReconcileWarning::CancelRequestOverridden { transaction_id: result.transaction.id });
        }
        if result.transaction.kind == TransactionKind::SubscriptionPurchase {
            self.activate_subscription(&mut result).await;
        }
        Ok(result)
    }

    async fn annul_pending(
        &self,
        tx: Transaction,
        status: TransactionStatus,
        reason: Option<&str>,
    ) -> Result<ReconcileResult, LedgerError> {
        match self.engine.try_annul(tx.id, status, reason).await? {
            TransitionResult::Applied(annulled) => {
                let account = self.db.fetch_account(annulled.account_id).await?;
                Ok(ReconcileResult::new(annulled, account, Disposition::Applied))
            },
            TransitionResult::AlreadyResolved(terminal) => self.replay(terminal, None).await,
        }
    }

    /// A subscription activation failure never undoes the settlement. It becomes a warning and an alert.
    async fn activate_subscription(&self, result: &mut ReconcileResult) {
        match self.subscriptions.activate_for_transaction(&result.transaction).await {
            Ok(activation) => result.subscription = Some(activation.subscription),
            Err(e) => {
                let transaction_id = result.transaction.id;
                warn!("🔁 Transaction #{transaction_id} is settled, but activating its subscription failed: {e}");
                let reason = e.to_string();
                let alert =
                    NewLedgerAlert::for_transaction(AlertKind::SubscriptionActivationFailed, &result.transaction, &reason);
                self.raise_alert(alert).await;
                result.warnings.push(ReconcileWarning::SubscriptionActivationFailed { transaction_id, reason });
            },
        }
    }

    /// Reports a terminal transaction without changing anything.
    async fn replay(
        &self,
        tx: Transaction,
        outcome: Option<&CanonicalOutcome>,
    ) -> Result<ReconcileResult, LedgerError> {
        debug!("🔁 Transaction #{} ({}) is already {}. Replaying the recorded result.", tx.id, tx.gateway_ref, tx.status);
        let account = self.db.fetch_account(tx.account_id).await?;
        let mut result = ReconcileResult::new(tx, account, Disposition::Replayed);
        let tx = &result.transaction;
        if let Some(outcome) = outcome {
            let agrees = matches!(
                (outcome.outcome, tx.status),
                (PaymentOutcome::Succeeded, TransactionStatus::Settled) |
                    (PaymentOutcome::Failed, TransactionStatus::Failed) |
                    (PaymentOutcome::Cancelled, TransactionStatus::Cancelled)
            );
            if !agrees {
                warn!(
                    "🔁 Gateway now reports {} for transaction #{}, which was recorded as {}",
                    outcome.outcome, tx.id, tx.status
                );
                result.warnings.push(ReconcileWarning::ConflictingReplay {
                    transaction_id: tx.id,
                    reported: outcome.outcome.to_string(),
                });
            }
        }
        if result.transaction.kind == TransactionKind::SubscriptionPurchase &&
            result.transaction.status == TransactionStatus::Settled
        {
            let subscription = self.db.fetch_subscription_for_funding(result.transaction.id).await?;
            if subscription.is_none() {
                result.warnings.push(ReconcileWarning::SubscriptionActivationFailed {
                    transaction_id: result.transaction.id,
                    reason: "the subscription has not been activated yet".into(),
                });
            }
            result.subscription = subscription;
        }
        Ok(result)
    }

    async fn raise_alert(&self, alert: NewLedgerAlert) {
        match self.db.record_alert(alert).await {
            Ok(alert) => {
                warn!("🔁 Operator alert #{} ({}): {}", alert.id, alert.kind, alert.detail);
                for emitter in &self.producers.operator_alert_producer {
                    emitter.publish_event(OperatorAlertEvent { alert: alert.clone() }).await;
                }
            },
            Err(e) => error!("🔁 Could not record an operator alert: {e}"),
        }
    }
}
