use std::time::Duration;

use chrono::Duration as ChronoDuration;
use ledger_engine::{
    db_types::Subscription,
    gateway::HttpGateways,
    ReconciliationApi,
    SqliteDatabase,
    SubscriptionApi,
};
use log::*;
use tokio::task::JoinHandle;

/// Starts the subscription expiry worker. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_expiry_worker(api: SubscriptionApi<SqliteDatabase>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Subscription expiry worker started. Running every {interval:?}");
        loop {
            timer.tick().await;
            debug!("🕰️ Running subscription expiry job");
            match api.expire().await {
                Ok(expired) if expired.is_empty() => trace!("🕰️ No subscriptions expired"),
                Ok(expired) => info!("🕰️ {} subscriptions expired: {}", expired.len(), subscription_list(&expired)),
                Err(e) => error!("🕰️ Error running subscription expiry job: {e}"),
            }
        }
    })
}

/// Starts the pending-transaction reconciliation worker. Do not await the returned JoinHandle, as it will run
/// indefinitely.
pub fn start_reconcile_worker(
    api: ReconciliationApi<SqliteDatabase, HttpGateways>,
    interval: Duration,
    min_age: ChronoDuration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Reconciliation worker started. Re-querying transactions pending for over {min_age} every {interval:?}");
        loop {
            timer.tick().await;
            debug!("🕰️ Running pending transaction sweep");
            match api.sweep_pending(min_age).await {
                Ok(report) if report.examined == 0 => trace!("🕰️ Nothing to reconcile"),
                Ok(report) => info!(
                    "🕰️ Sweep examined {} transactions. {} resolved, {} still pending, {} errors",
                    report.examined, report.resolved, report.still_pending, report.errors
                ),
                Err(e) => error!("🕰️ Error running pending transaction sweep: {e}"),
            }
        }
    })
}

fn subscription_list(subscriptions: &[Subscription]) -> String {
    subscriptions
        .iter()
        .map(|s| format!("[{}] user: {} ended: {}", s.id, s.user_id, s.end_date))
        .collect::<Vec<String>>()
        .join(", ")
}
