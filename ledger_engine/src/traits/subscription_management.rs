use chrono::{DateTime, Utc};

use crate::{
    db_types::{PlanType, Subscription},
    traits::{data_objects::ActivationResult, LedgerDbError},
};

/// Storage for subscription state. Rows are never deleted, only status-transitioned.
#[allow(async_fn_in_trait)]
pub trait SubscriptionManagement {
    /// Applies a settled subscription purchase to the user's subscriptions, atomically:
    ///
    /// * If the funding transaction has already been applied, nothing changes (`already_applied` is set).
    /// * If the user has an active subscription that has not yet run out, its end date is pushed back by the plan
    ///   duration.
    /// * Otherwise (no active subscription, or one whose end date has already passed but has not been swept yet) a new
    ///   subscription starting at `now` is created. A lapsed active row is expired first.
    async fn activate_subscription(
        &self,
        user_id: &str,
        plan: PlanType,
        duration_days: i64,
        funding_transaction_id: i64,
        now: DateTime<Utc>,
    ) -> Result<ActivationResult, LedgerDbError>;

    /// Transitions every active subscription whose end date is before `now` to `expired`, returning the rows that
    /// changed. Safe to run redundantly.
    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>, LedgerDbError>;

    /// Transitions an active subscription to `cancelled`.
    async fn cancel_subscription(&self, id: i64, now: DateTime<Utc>) -> Result<Subscription, LedgerDbError>;

    async fn fetch_subscription(&self, id: i64) -> Result<Option<Subscription>, LedgerDbError>;

    async fn fetch_active_subscription(&self, user_id: &str) -> Result<Option<Subscription>, LedgerDbError>;

    /// The subscription (if any) that the given transaction funded or extended.
    async fn fetch_subscription_for_funding(&self, transaction_id: i64) -> Result<Option<Subscription>, LedgerDbError>;

    /// Full subscription history for the user, newest first.
    async fn fetch_subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>, LedgerDbError>;
}
