use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{GatewayKind, GatewayRef, NewTransaction, Transaction, TransactionStatus},
    sqlite::db::map_unique_violation,
    traits::LedgerDbError,
};

/// Inserts a new pending transaction. This is not atomic on its own account; embed it in a transaction and pass
/// `&mut tx` as the connection argument if other writes must go with it.
pub async fn insert(
    transaction: NewTransaction,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Transaction, LedgerDbError> {
    let gateway_ref = transaction.gateway_ref.clone();
    let account_id = transaction.account_id;
    let metadata = transaction.metadata.map(|m| m.to_string());
    let result = sqlx::query_as(
        r#"
            INSERT INTO transactions (
                account_id,
                kind,
                amount,
                currency,
                status,
                gateway,
                gateway_ref,
                metadata,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING *;
        "#,
    )
    .bind(transaction.account_id)
    .bind(transaction.kind)
    .bind(transaction.amount)
    .bind(transaction.currency)
    .bind(TransactionStatus::Pending)
    .bind(transaction.gateway)
    .bind(transaction.gateway_ref)
    .bind(metadata)
    .bind(now)
    .fetch_all(conn)
    .await
    .and_then(|rows: Vec<Transaction>| rows.into_iter().next().ok_or(sqlx::Error::RowNotFound));
    match result {
        Ok(tx) => Ok(tx),
        Err(sqlx::Error::Database(err)) if err.is_foreign_key_violation() => {
            Err(LedgerDbError::AccountNotFound(account_id))
        },
        Err(e) => Err(map_unique_violation(e, LedgerDbError::DuplicateGatewayRef(gateway_ref))),
    }
}

pub async fn fetch_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Transaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM transactions WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_by_gateway_ref(
    gateway_ref: &GatewayRef,
    conn: &mut SqliteConnection,
) -> Result<Option<Transaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM transactions WHERE gateway_ref = $1")
        .bind(gateway_ref.as_str())
        .fetch_optional(conn)
        .await
}

pub async fn fetch_for_account(account_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Transaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM transactions WHERE account_id = $1 ORDER BY created_at DESC, id DESC")
        .bind(account_id)
        .fetch_all(conn)
        .await
}

pub async fn fetch_stale_pending(
    created_before: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Transaction>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT * FROM transactions
            WHERE status = $1 AND gateway <> $2 AND created_at < $3
            ORDER BY created_at ASC
        "#,
    )
    .bind(TransactionStatus::Pending)
    .bind(GatewayKind::Internal)
    .bind(created_before)
    .fetch_all(conn)
    .await
}

/// The conditional `pending -> settled` update. Returns `None` if the transaction does not exist or is no longer
/// pending, in which case nothing was written.
pub async fn mark_settled(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Transaction>, sqlx::Error> {
    let rows: Vec<Transaction> = sqlx::query_as(
        r#"
            UPDATE transactions SET status = $1, resolved_at = $2, updated_at = $2
            WHERE id = $3 AND status = $4
            RETURNING *;
        "#,
    )
    .bind(TransactionStatus::Settled)
    .bind(now)
    .bind(id)
    .bind(TransactionStatus::Pending)
    .fetch_all(conn)
    .await?;
    let tx = rows.into_iter().next();
    if tx.is_some() {
        trace!("🗃️ Transaction #{id} marked as settled");
    }
    Ok(tx)
}

/// The conditional `pending -> failed | cancelled` update. Returns `None` if nothing was written.
pub async fn mark_annulled(
    id: i64,
    status: TransactionStatus,
    reason: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Transaction>, sqlx::Error> {
    let rows: Vec<Transaction> = sqlx::query_as(
        r#"
            UPDATE transactions SET status = $1, failure_reason = $2, resolved_at = $3, updated_at = $3
            WHERE id = $4 AND status = $5
            RETURNING *;
        "#,
    )
    .bind(status)
    .bind(reason)
    .bind(now)
    .bind(id)
    .bind(TransactionStatus::Pending)
    .fetch_all(conn)
    .await?;
    let tx = rows.into_iter().next();
    if tx.is_some() {
        trace!("🗃️ Transaction #{id} marked as {status}");
    }
    Ok(tx)
}

pub async fn set_cancel_requested(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Transaction>, sqlx::Error> {
    let rows: Vec<Transaction> = sqlx::query_as(
        r#"
            UPDATE transactions SET cancel_requested = TRUE, updated_at = $1
            WHERE id = $2 AND status = $3
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(id)
    .bind(TransactionStatus::Pending)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().next())
}
