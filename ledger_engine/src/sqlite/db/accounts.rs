use chrono::{DateTime, Utc};
use ledger_common::Amount;
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Account, TransactionStatus},
    traits::{LedgerDbError, LedgerTotals},
};

/// Fetches the account for `user_id`, creating it with a zero balance if it does not exist. This is a single write
/// statement, so it is safe to call concurrently for the same user.
pub async fn fetch_or_create(
    user_id: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Account, LedgerDbError> {
    let rows: Vec<Account> = sqlx::query_as(
        r#"
            INSERT INTO accounts (user_id, balance, created_at, updated_at) VALUES ($1, 0, $2, $2)
            ON CONFLICT (user_id) DO UPDATE SET user_id = excluded.user_id
            RETURNING *;
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_all(conn)
    .await?;
    rows.into_iter()
        .next()
        .ok_or_else(|| LedgerDbError::DatabaseError(format!("Could not open an account for {user_id}")))
}

pub async fn fetch_account(account_id: i64, conn: &mut SqliteConnection) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM accounts WHERE id = $1").bind(account_id).fetch_optional(conn).await
}

pub async fn fetch_account_for_user(
    user_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM accounts WHERE user_id = $1").bind(user_id).fetch_optional(conn).await
}

/// Adds `amount` to the account balance.
pub async fn credit(
    account_id: i64,
    amount: Amount,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Account, LedgerDbError> {
    let rows: Vec<Account> = sqlx::query_as(
        "UPDATE accounts SET balance = balance + $1, updated_at = $2 WHERE id = $3 RETURNING *",
    )
    .bind(amount)
    .bind(now)
    .bind(account_id)
    .fetch_all(conn)
    .await?;
    let account = rows.into_iter().next().ok_or(LedgerDbError::AccountNotFound(account_id))?;
    trace!("🗃️ Account #{account_id} credited {amount}. Balance is now {}", account.balance);
    Ok(account)
}

/// Subtracts `amount` from the account balance, but only if the balance covers it. The check and the debit are one
/// statement, so two concurrent debits can never both see the same pre-debit balance.
pub async fn debit(
    account_id: i64,
    amount: Amount,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Account, LedgerDbError> {
    let rows: Vec<Account> = sqlx::query_as(
        r#"
            UPDATE accounts SET balance = balance - $1, updated_at = $2
            WHERE id = $3 AND balance >= $1
            RETURNING *;
        "#,
    )
    .bind(amount)
    .bind(now)
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await?;
    match rows.into_iter().next() {
        Some(account) => {
            trace!("🗃️ Account #{account_id} debited {amount}. Balance is now {}", account.balance);
            Ok(account)
        },
        None => match fetch_account(account_id, conn).await? {
            Some(account) => Err(LedgerDbError::InsufficientFunds {
                account_id,
                balance: account.balance,
                requested: amount,
            }),
            None => Err(LedgerDbError::AccountNotFound(account_id)),
        },
    }
}

pub async fn settled_totals(account_id: i64, conn: &mut SqliteConnection) -> Result<LedgerTotals, sqlx::Error> {
    let (credits, debits): (i64, i64) = sqlx::query_as(
        r#"
            SELECT
                COALESCE(SUM(CASE WHEN kind IN ('deposit', 'transfer_in', 'refund') THEN amount ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN kind IN ('transfer_out', 'subscription_purchase') THEN amount ELSE 0 END), 0)
            FROM transactions
            WHERE account_id = $1 AND status = $2
        "#,
    )
    .bind(account_id)
    .bind(TransactionStatus::Settled)
    .fetch_one(conn)
    .await?;
    Ok(LedgerTotals { credits: Amount::from(credits), debits: Amount::from(debits) })
}
