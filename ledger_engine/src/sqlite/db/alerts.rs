use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db_types::{LedgerAlert, NewLedgerAlert};

pub async fn insert(
    alert: NewLedgerAlert,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<LedgerAlert, sqlx::Error> {
    let rows: Vec<LedgerAlert> = sqlx::query_as(
        r#"
            INSERT INTO ledger_alerts (kind, gateway, gateway_ref, transaction_id, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(alert.kind)
    .bind(alert.gateway)
    .bind(alert.gateway_ref)
    .bind(alert.transaction_id)
    .bind(alert.detail)
    .bind(now)
    .fetch_all(conn)
    .await?;
    rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)
}

pub async fn fetch(include_acknowledged: bool, conn: &mut SqliteConnection) -> Result<Vec<LedgerAlert>, sqlx::Error> {
    let sql = if include_acknowledged {
        "SELECT * FROM ledger_alerts ORDER BY created_at DESC, id DESC"
    } else {
        "SELECT * FROM ledger_alerts WHERE acknowledged = FALSE ORDER BY created_at DESC, id DESC"
    };
    sqlx::query_as(sql).fetch_all(conn).await
}

pub async fn acknowledge(id: i64, conn: &mut SqliteConnection) -> Result<Option<LedgerAlert>, sqlx::Error> {
    let rows: Vec<LedgerAlert> =
        sqlx::query_as("UPDATE ledger_alerts SET acknowledged = TRUE WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_all(conn)
            .await?;
    Ok(rows.into_iter().next())
}
