use chrono::{DateTime, Duration, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::db_types::{PlanType, Subscription, SubscriptionStatus};

/// Claims the funding transaction. Returns `false` if it has been claimed before, in which case nothing was written.
///
/// This is a write, so calling it first in an atomic unit also takes the database write lock.
pub async fn claim_funding(
    transaction_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("INSERT OR IGNORE INTO subscription_fundings (transaction_id, applied_at) VALUES ($1, $2)")
            .bind(transaction_id)
            .bind(now)
            .execute(conn)
            .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn link_funding(
    transaction_id: i64,
    subscription_id: i64,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE subscription_fundings SET subscription_id = $1 WHERE transaction_id = $2")
        .bind(subscription_id)
        .bind(transaction_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_for_funding(
    transaction_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Subscription>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT subscriptions.* FROM subscriptions
            JOIN subscription_fundings ON subscription_fundings.subscription_id = subscriptions.id
            WHERE subscription_fundings.transaction_id = $1
        "#,
    )
    .bind(transaction_id)
    .fetch_optional(conn)
    .await
}

pub async fn fetch_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Subscription>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM subscriptions WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_active_for_user(
    user_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Subscription>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1 AND status = $2")
        .bind(user_id)
        .bind(SubscriptionStatus::Active)
        .fetch_optional(conn)
        .await
}

pub async fn fetch_for_user(user_id: &str, conn: &mut SqliteConnection) -> Result<Vec<Subscription>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC, id DESC")
        .bind(user_id)
        .fetch_all(conn)
        .await
}

pub async fn insert(
    user_id: &str,
    plan: PlanType,
    duration_days: i64,
    funding_transaction_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Subscription, sqlx::Error> {
    let end_date = now + Duration::days(duration_days);
    let rows: Vec<Subscription> = sqlx::query_as(
        r#"
            INSERT INTO subscriptions (
                user_id,
                plan_type,
                duration_days,
                start_date,
                end_date,
                status,
                funding_transaction_id,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $4, $4)
            RETURNING *;
        "#,
    )
    .bind(user_id)
    .bind(plan)
    .bind(duration_days)
    .bind(now)
    .bind(end_date)
    .bind(SubscriptionStatus::Active)
    .bind(funding_transaction_id)
    .fetch_all(conn)
    .await?;
    let subscription = rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)?;
    trace!("🗃️ Subscription #{} created for {user_id}, ends {}", subscription.id, subscription.end_date);
    Ok(subscription)
}

/// Pushes the end date of an active subscription back by `days` and switches it to `plan`.
pub async fn extend(
    id: i64,
    plan: PlanType,
    days: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Subscription>, sqlx::Error> {
    let current = match fetch_by_id(id, &mut *conn).await? {
        Some(s) if s.status == SubscriptionStatus::Active => s,
        _ => return Ok(None),
    };
    let end_date = current.end_date + Duration::days(days);
    let rows: Vec<Subscription> = sqlx::query_as(
        r#"
            UPDATE subscriptions
            SET end_date = $1, duration_days = duration_days + $2, plan_type = $3, updated_at = $4
            WHERE id = $5 AND status = $6
            RETURNING *;
        "#,
    )
    .bind(end_date)
    .bind(days)
    .bind(plan)
    .bind(now)
    .bind(id)
    .bind(SubscriptionStatus::Active)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().next())
}

/// The conditional `active -> expired | cancelled` update. Returns `None` if nothing was written.
pub async fn close(
    id: i64,
    status: SubscriptionStatus,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Subscription>, sqlx::Error> {
    let rows: Vec<Subscription> = sqlx::query_as(
        "UPDATE subscriptions SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4 RETURNING *",
    )
    .bind(status)
    .bind(now)
    .bind(id)
    .bind(SubscriptionStatus::Active)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().next())
}

pub async fn expire_due(now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Vec<Subscription>, sqlx::Error> {
    sqlx::query_as(
        r#"
            UPDATE subscriptions SET status = $1, updated_at = $2
            WHERE status = $3 AND end_date < $2
            RETURNING *;
        "#,
    )
    .bind(SubscriptionStatus::Expired)
    .bind(now)
    .bind(SubscriptionStatus::Active)
    .fetch_all(conn)
    .await
}
