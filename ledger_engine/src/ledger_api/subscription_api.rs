use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{PlanType, Subscription, Transaction, TransactionKind, TransactionStatus},
    events::{EventProducers, SubscriptionActivatedEvent},
    ledger_api::{ledger_objects::SubscriptionStatusView, LedgerError},
    traits::{ActivationResult, LedgerDatabase},
};

const SECONDS_PER_DAY: i64 = 86_400;

/// Derives premium status from settled subscription purchases and expiry dates.
///
/// States are `active`, `expired` and `cancelled`; a user with no rows is simply not premium. Rows are never deleted.
pub struct SubscriptionApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B: Debug> Debug for SubscriptionApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubscriptionApi ({:?})", self.db)
    }
}

impl<B: Clone> Clone for SubscriptionApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), producers: self.producers.clone() }
    }
}

impl<B> SubscriptionApi<B>
where B: LedgerDatabase
{
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    /// Grants `duration_days` of premium to the owner of `account_id`, paid for by `funding_transaction_id`.
    ///
    /// An active subscription is extended from its current end date, so renewing early loses nothing. Otherwise a new
    /// subscription starts now. Applying the same funding transaction twice is a no-op.
    pub async fn activate(
        &self,
        account_id: i64,
        plan: PlanType,
        duration_days: i64,
        funding_transaction_id: i64,
    ) -> Result<ActivationResult, LedgerError> {
        if duration_days <= 0 {
            return Err(LedgerError::InvalidRequest(format!("Subscription duration must be positive, not {duration_days}")));
        }
        let account =
            self.db.fetch_account(account_id).await?.ok_or(LedgerError::AccountNotFound(account_id))?;
        let now = Utc::now();
        let result = self
            .db
            .activate_subscription(&account.user_id, plan, duration_days, funding_transaction_id, now)
            .await?;
        let sub = &result.subscription;
        if result.already_applied {
            debug!("🎟️ Transaction #{funding_transaction_id} was already applied to subscription #{}", sub.id);
            return Ok(result);
        }
        if result.extended {
            info!("🎟️ Subscription #{} for {} extended by {duration_days} days to {}", sub.id, sub.user_id, sub.end_date);
        } else {
            info!("🎟️ Subscription #{} ({plan}) for {} is active until {}", sub.id, sub.user_id, sub.end_date);
        }
        for emitter in &self.producers.subscription_activated_producer {
            trace!("🎟️ Notifying subscription activated hook subscribers");
            let event = SubscriptionActivatedEvent { subscription: sub.clone(), extended: result.extended };
            emitter.publish_event(event).await;
        }
        Ok(result)
    }

    /// Activates the subscription paid for by a settled subscription purchase, reading the plan from its metadata.
    pub async fn activate_for_transaction(&self, transaction: &Transaction) -> Result<ActivationResult, LedgerError> {
        let failed = |reason: String| LedgerError::SubscriptionActivationFailed { transaction_id: transaction.id, reason };
        if transaction.kind != TransactionKind::SubscriptionPurchase {
            return Err(failed(format!("transaction is a {}, not a subscription purchase", transaction.kind)));
        }
        if transaction.status != TransactionStatus::Settled {
            return Err(failed(format!("transaction is {}, not settled", transaction.status)));
        }
        let plan = transaction.plan().map_err(|e| failed(e.to_string()))?;
        self.activate(transaction.account_id, plan, plan.duration_days(), transaction.id).await.map_err(|e| match e {
            e @ LedgerError::SubscriptionActivationFailed { .. } => e,
            e => failed(e.to_string()),
        })
    }

    /// Expires every active subscription whose end date has passed. Running it again changes nothing.
    pub async fn expire(&self) -> Result<Vec<Subscription>, LedgerError> {
        self.expire_at(Utc::now()).await
    }

    pub async fn expire_at(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>, LedgerError> {
        let expired = self.db.expire_subscriptions(now).await?;
        for sub in &expired {
            info!("🎟️ Subscription #{} for {} expired (ended {})", sub.id, sub.user_id, sub.end_date);
        }
        if expired.is_empty() {
            trace!("🎟️ No subscriptions to expire");
        }
        Ok(expired)
    }

    /// Cancels an active subscription immediately. The funding transaction is left as it is.
    pub async fn cancel(&self, subscription_id: i64) -> Result<Subscription, LedgerError> {
        let sub = self.db.cancel_subscription(subscription_id, Utc::now()).await?;
        info!("🎟️ Subscription #{subscription_id} for {} cancelled", sub.user_id);
        Ok(sub)
    }

    pub async fn status(&self, user_id: &str) -> Result<SubscriptionStatusView, LedgerError> {
        self.status_at(user_id, Utc::now()).await
    }

    /// Premium status as of `now`. A subscription whose end date has passed counts as lapsed even if the expiry sweep
    /// has not reached it yet.
    pub async fn status_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<SubscriptionStatusView, LedgerError> {
        let subscription = self.db.fetch_active_subscription(user_id).await?;
        let is_premium = subscription.as_ref().is_some_and(|s| s.is_active_at(now));
        let days_remaining = match (&subscription, is_premium) {
            (Some(s), true) => days_ceil((s.end_date - now).num_seconds()),
            _ => 0,
        };
        Ok(SubscriptionStatusView { user_id: user_id.to_string(), is_premium, subscription, days_remaining, as_of: now })
    }

    pub async fn history(&self, user_id: &str) -> Result<Vec<Subscription>, LedgerError> {
        Ok(self.db.fetch_subscriptions_for_user(user_id).await?)
    }
}

fn days_ceil(seconds: i64) -> i64 {
    if seconds <= 0 {
        0
    } else {
        (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
    }
}

#[cfg(test)]
mod test {
    use super::days_ceil;

    #[test]
    fn partial_days_round_up() {
        assert_eq!(days_ceil(0), 0);
        assert_eq!(days_ceil(-5), 0);
        assert_eq!(days_ceil(1), 1);
        assert_eq!(days_ceil(86_400), 1);
        assert_eq!(days_ceil(86_401), 2);
        assert_eq!(days_ceil(30 * 86_400 - 10), 30);
    }
}
