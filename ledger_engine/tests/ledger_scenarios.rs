use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use ledger_common::Amount;
use ledger_engine::{
    db_types::{AlertKind, GatewayKind, PlanType, SubscriptionStatus, TransactionKind, TransactionStatus},
    events::EventProducers,
    gateway::{CanonicalOutcome, GatewayAdapter},
    ledger_objects::{Disposition, ReconcileWarning},
    test_utils::{
        prepare_env::{fresh_database, tear_down},
        simulated_gateway::SimulatedGateway,
    },
    AccountManagement,
    LedgerDbError,
    LedgerError,
    ReconciliationApi,
    SqliteDatabase,
    SubscriptionManagement,
};
use serde_json::json;

type Api = ReconciliationApi<SqliteDatabase, SimulatedGateway>;

async fn setup() -> (SqliteDatabase, Api) {
    let db = fresh_database().await;
    let gateway = GatewayAdapter::new(SimulatedGateway::new(), StdDuration::from_millis(250));
    let api = ReconciliationApi::new(db.clone(), gateway, EventProducers::default());
    (db, api)
}

async fn funded_account(api: &Api, user: &str, major: i64) -> i64 {
    let account = api.engine().open_account(user).await.expect("Error opening account");
    api.engine()
        .adjust_balance(account.id, TransactionKind::Deposit, Amount::from_major(major), "opening balance")
        .await
        .expect("Error funding account");
    account.id
}

#[tokio::test]
async fn subscription_purchase_settles_once_and_activates() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "alice", 1000).await;
    let t1 = api
        .engine()
        .initiate(account_id, TransactionKind::SubscriptionPurchase, Amount::from_major(150), Some(json!({"plan": "monthly"})))
        .await
        .expect("Error initiating purchase");
    assert_eq!(t1.status, TransactionStatus::Pending);

    let outcome = CanonicalOutcome::succeeded(t1.gateway, t1.gateway_ref.clone(), Amount::from_major(150), "BDT");
    let before = Utc::now();
    let first = api.reconcile(&outcome).await.expect("Error reconciling");
    assert_eq!(first.disposition, Disposition::Applied);
    assert_eq!(first.transaction.status, TransactionStatus::Settled);
    assert_eq!(first.account.as_ref().map(|a| a.balance), Some(Amount::from_major(850)));
    assert!(first.warnings.is_empty());
    let sub = first.subscription.clone().expect("Subscription was not activated");
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.plan_type, PlanType::Monthly);
    assert_eq!(sub.duration_days, 30);
    assert_eq!(sub.funding_transaction_id, t1.id);
    let expected_end = before + Duration::days(30);
    assert!((sub.end_date - expected_end).num_seconds().abs() < 60);

    let second = api.reconcile(&outcome).await.expect("Error replaying");
    assert_eq!(second.disposition, Disposition::Replayed);
    assert_eq!(second.transaction, first.transaction);
    assert_eq!(second.account.map(|a| a.balance), Some(Amount::from_major(850)));
    assert_eq!(second.subscription.map(|s| s.end_date), Some(sub.end_date));
    assert!(second.warnings.is_empty());
    assert_eq!(db.fetch_subscriptions_for_user("alice").await.unwrap().len(), 1);
    tear_down(db).await;
}

#[tokio::test]
async fn overdrawing_transfer_out_is_rejected() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "bob", 150).await;
    let tx = api
        .engine()
        .initiate(account_id, TransactionKind::TransferOut, Amount::from_major(200), None)
        .await
        .expect("Error initiating transfer");
    let err = api.engine().settle(tx.id).await.expect_err("Settle should have failed");
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }), "unexpected error {err}");
    let account = api.engine().account(account_id).await.unwrap();
    assert_eq!(account.balance, Amount::from_major(150));
    let tx = db.fetch_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    tear_down(db).await;
}

#[tokio::test]
async fn unknown_gateway_reference_is_discarded_and_alerted() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "carol", 100).await;
    let stray_ref = "CRD-20260101000000-DEADBEEF0000".into();
    let outcome = CanonicalOutcome::succeeded(GatewayKind::Card, stray_ref, Amount::from_major(500), "BDT");
    let err = api.reconcile(&outcome).await.expect_err("Unknown reference was accepted");
    assert!(matches!(err, LedgerError::UnknownTransaction(_)));
    let account = api.engine().account(account_id).await.unwrap();
    assert_eq!(account.balance, Amount::from_major(100));
    assert!(db.fetch_transaction_by_gateway_ref(&outcome.gateway_ref).await.unwrap().is_none());
    let alerts = db.fetch_alerts(false).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::UnknownTransaction);
    tear_down(db).await;
}

#[tokio::test]
async fn expiry_sweep_is_idempotent() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "dave", 500).await;
    let tx = api
        .engine()
        .initiate(account_id, TransactionKind::SubscriptionPurchase, Amount::from_major(150), Some(json!({"plan": "monthly"})))
        .await
        .unwrap();
    api.engine().settle(tx.id).await.unwrap();
    let long_ago = Utc::now() - Duration::days(40);
    let activation = db.activate_subscription("dave", PlanType::Monthly, 30, tx.id, long_ago).await.unwrap();
    assert!(activation.subscription.end_date < Utc::now());

    let expired = api.subscriptions().expire().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].status, SubscriptionStatus::Expired);
    assert!(api.subscriptions().expire().await.unwrap().is_empty());
    let sub = db.fetch_subscription(activation.subscription.id).await.unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Expired);
    let status = api.subscriptions().status("dave").await.unwrap();
    assert!(!status.is_premium);
    tear_down(db).await;
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_anything_is_written() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "erin", 10).await;
    let err = api.engine().initiate(account_id, TransactionKind::Deposit, Amount::from(0), None).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
    let err = api.engine().initiate(account_id, TransactionKind::Deposit, Amount::from(-500), None).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
    let err = api.engine().initiate(9999, TransactionKind::Deposit, Amount::from(500), None).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound(9999)));
    // Only the opening deposit exists
    assert_eq!(api.engine().history(account_id).await.unwrap().len(), 1);
    tear_down(db).await;
}

#[tokio::test]
async fn mismatched_amount_fails_the_transaction() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "frank", 1).await;
    let tx = api.engine().initiate(account_id, TransactionKind::Deposit, Amount::from_major(100), None).await.unwrap();
    let tampered = CanonicalOutcome::succeeded(tx.gateway, tx.gateway_ref.clone(), Amount::from_major(10_000), "BDT");
    let err = api.reconcile(&tampered).await.expect_err("Mismatch was accepted");
    assert!(matches!(err, LedgerError::GatewayMismatch { .. }));
    let tx = db.fetch_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert!(tx.failure_reason.unwrap_or_default().contains("mismatch"));
    assert_eq!(api.engine().account(account_id).await.unwrap().balance, Amount::from_major(1));

    let wrong_currency =
        CanonicalOutcome::succeeded(tx.gateway, tx.gateway_ref.clone(), Amount::from_major(100), "USD");
    let replay = api.reconcile(&wrong_currency).await.expect("Replay of a failed transaction should be a no-op");
    assert_eq!(replay.disposition, Disposition::Replayed);
    assert!(matches!(replay.warnings[0], ReconcileWarning::ConflictingReplay { .. }));
    let alerts = db.fetch_alerts(false).await.unwrap();
    assert_eq!(alerts.iter().filter(|a| a.kind == AlertKind::GatewayMismatch).count(), 1);
    tear_down(db).await;
}

#[tokio::test]
async fn mismatched_cancellation_is_not_taken_at_face_value() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "heidi", 5).await;
    let tx = api
        .engine()
        .initiate_with_gateway(account_id, TransactionKind::Deposit, Amount::from_major(50), None, GatewayKind::WalletA)
        .await
        .unwrap();
    let cancelled = CanonicalOutcome::cancelled(tx.gateway, tx.gateway_ref.clone(), Amount::from(1), "USD");
    let err = api.reconcile(&cancelled).await.expect_err("Mismatched cancellation was accepted");
    assert!(matches!(err, LedgerError::GatewayMismatch { .. }));
    let stored = db.fetch_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert!(stored.failure_reason.unwrap_or_default().contains("mismatch"));
    assert_eq!(api.engine().account(account_id).await.unwrap().balance, Amount::from_major(5));
    let alerts = db.fetch_alerts(false).await.unwrap();
    let mismatches = alerts.iter().filter(|a| a.kind == AlertKind::GatewayMismatch).collect::<Vec<_>>();
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].transaction_id, Some(tx.id));
    tear_down(db).await;
}

#[tokio::test]
async fn outcomes_from_another_gateway_are_not_applied() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "ivan", 10).await;
    let tx = api
        .engine()
        .initiate_with_gateway(account_id, TransactionKind::Deposit, Amount::from_major(50), None, GatewayKind::Card)
        .await
        .unwrap();
    let foreign = CanonicalOutcome::succeeded(GatewayKind::WalletB, tx.gateway_ref.clone(), tx.amount, "BDT");
    let err = api.reconcile(&foreign).await.expect_err("Outcome from the wrong gateway was accepted");
    assert!(matches!(err, LedgerError::UnknownTransaction(_)));
    let stored = db.fetch_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
    assert_eq!(api.engine().account(account_id).await.unwrap().balance, Amount::from_major(10));
    let alerts = db.fetch_alerts(false).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::UnknownTransaction);
    assert_eq!(alerts[0].gateway, Some(GatewayKind::WalletB));

    let genuine = CanonicalOutcome::succeeded(GatewayKind::Card, tx.gateway_ref.clone(), tx.amount, "BDT");
    let res = api.reconcile(&genuine).await.unwrap();
    assert_eq!(res.disposition, Disposition::Applied);
    assert_eq!(api.engine().account(account_id).await.unwrap().balance, Amount::from_major(60));
    tear_down(db).await;
}

#[tokio::test]
async fn subscriptions_are_only_funded_by_the_subscriber() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "judy", 500).await;
    let tx = api
        .engine()
        .initiate(account_id, TransactionKind::SubscriptionPurchase, Amount::from_major(150), Some(json!({"plan": "monthly"})))
        .await
        .unwrap();
    api.engine().settle(tx.id).await.unwrap();
    api.engine().open_account("mallory").await.unwrap();
    let err = db
        .activate_subscription("mallory", PlanType::Monthly, 30, tx.id, Utc::now())
        .await
        .expect_err("Someone else's purchase funded a subscription");
    assert!(matches!(err, LedgerDbError::InvalidFundingTransaction(id) if id == tx.id));
    assert!(db.fetch_subscriptions_for_user("mallory").await.unwrap().is_empty());

    let activation = db.activate_subscription("judy", PlanType::Monthly, 30, tx.id, Utc::now()).await.unwrap();
    assert_eq!(activation.subscription.user_id, "judy");
    tear_down(db).await;
}

#[tokio::test]
async fn failed_and_cancelled_outcomes_leave_balance_untouched() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "grace", 50).await;
    let t1 = api.engine().initiate(account_id, TransactionKind::Deposit, Amount::from_major(20), None).await.unwrap();
    let t2 = api.engine().initiate(account_id, TransactionKind::Deposit, Amount::from_major(30), None).await.unwrap();
    let failed =
        CanonicalOutcome::failed(t1.gateway, t1.gateway_ref.clone(), t1.amount, "BDT").with_reason("card declined");
    let res = api.reconcile(&failed).await.unwrap();
    assert_eq!(res.transaction.status, TransactionStatus::Failed);
    assert_eq!(res.transaction.failure_reason.as_deref(), Some("card declined"));
    let cancelled = CanonicalOutcome::cancelled(t2.gateway, t2.gateway_ref.clone(), t2.amount, "BDT");
    let res = api.reconcile(&cancelled).await.unwrap();
    assert_eq!(res.transaction.status, TransactionStatus::Cancelled);
    assert_eq!(res.account.map(|a| a.balance), Some(Amount::from_major(50)));
    // A late success cannot resurrect a cancelled transaction
    let late = CanonicalOutcome::succeeded(t2.gateway, t2.gateway_ref.clone(), t2.amount, "BDT");
    let res = api.reconcile(&late).await.unwrap();
    assert_eq!(res.disposition, Disposition::Replayed);
    assert_eq!(res.transaction.status, TransactionStatus::Cancelled);
    assert_eq!(api.engine().account(account_id).await.unwrap().balance, Amount::from_major(50));
    tear_down(db).await;
}

#[tokio::test]
async fn cancel_request_is_advisory() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "heidi", 5).await;
    let tx = api.engine().initiate(account_id, TransactionKind::Deposit, Amount::from_major(25), None).await.unwrap();
    let flagged = api.engine().request_cancel(tx.id).await.unwrap();
    assert!(flagged.cancel_requested);
    assert_eq!(flagged.status, TransactionStatus::Pending);
    let outcome = CanonicalOutcome::succeeded(tx.gateway, tx.gateway_ref.clone(), tx.amount, "BDT");
    let res = api.reconcile(&outcome).await.unwrap();
    assert_eq!(res.transaction.status, TransactionStatus::Settled);
    assert!(matches!(res.warnings[0], ReconcileWarning::CancelRequestOverridden { .. }));
    assert_eq!(res.account.map(|a| a.balance), Some(Amount::from_major(30)));
    tear_down(db).await;
}

#[tokio::test]
async fn missing_plan_is_a_warning_not_a_rollback() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "ivan", 300).await;
    let tx = api
        .engine()
        .initiate(account_id, TransactionKind::SubscriptionPurchase, Amount::from_major(100), Some(json!({"plan": "fortnightly"})))
        .await
        .unwrap();
    let outcome = CanonicalOutcome::succeeded(tx.gateway, tx.gateway_ref.clone(), tx.amount, "BDT");
    let res = api.reconcile(&outcome).await.unwrap();
    assert_eq!(res.transaction.status, TransactionStatus::Settled);
    assert_eq!(res.account.map(|a| a.balance), Some(Amount::from_major(200)));
    assert!(res.subscription.is_none());
    assert!(matches!(res.warnings[0], ReconcileWarning::SubscriptionActivationFailed { .. }));
    let alerts = db.fetch_alerts(false).await.unwrap();
    assert_eq!(alerts[0].kind, AlertKind::SubscriptionActivationFailed);
    let err = api.retry_activation(tx.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::SubscriptionActivationFailed { .. }));
    tear_down(db).await;
}

#[tokio::test]
async fn early_renewal_extends_from_current_end_date() {
    let (db, api) = setup().await;
    let account_id = funded_account(&api, "judy", 1000).await;
    let mut end_dates = Vec::new();
    for plan in ["monthly", "weekly"] {
        let tx = api
            .engine()
            .initiate(account_id, TransactionKind::SubscriptionPurchase, Amount::from_major(100), Some(json!({"plan": plan})))
            .await
            .unwrap();
        let outcome = CanonicalOutcome::succeeded(tx.gateway, tx.gateway_ref.clone(), tx.amount, "BDT");
        let res = api.reconcile(&outcome).await.unwrap();
        end_dates.push(res.subscription.expect("No subscription").end_date);
    }
    assert_eq!(end_dates[1] - end_dates[0], Duration::days(7));
    let subs = db.fetch_subscriptions_for_user("judy").await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].duration_days, 37);
    assert_eq!(subs[0].plan_type, PlanType::Weekly);
    let status = api.subscriptions().status("judy").await.unwrap();
    assert!(status.is_premium);
    assert_eq!(status.days_remaining, 37);

    let cancelled = api.subscriptions().cancel(subs[0].id).await.unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    let err = api.subscriptions().cancel(subs[0].id).await.unwrap_err();
    assert!(matches!(err, LedgerError::SubscriptionNotActive(_)));
    assert!(!api.subscriptions().status("judy").await.unwrap().is_premium);
    // Cancelling does not reverse the money
    assert_eq!(api.engine().account(account_id).await.unwrap().balance, Amount::from_major(800));
    tear_down(db).await;
}

#[tokio::test]
async fn transfers_move_money_atomically() {
    let (db, api) = setup().await;
    let alice = funded_account(&api, "alice", 100).await;
    let bob = api.engine().open_account("bob").await.unwrap().id;
    let (out, inc) = api.engine().transfer(alice, bob, Amount::from_major(40)).await.unwrap();
    assert_eq!(out.kind, TransactionKind::TransferOut);
    assert_eq!(inc.kind, TransactionKind::TransferIn);
    assert_eq!(out.status, TransactionStatus::Settled);
    assert_eq!(inc.status, TransactionStatus::Settled);
    let err = api.engine().transfer(alice, bob, Amount::from_major(61)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    let err = api.engine().transfer(alice, alice, Amount::from_major(1)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRequest(_)));
    assert_eq!(api.engine().account(alice).await.unwrap().balance, Amount::from_major(60));
    assert_eq!(api.engine().account(bob).await.unwrap().balance, Amount::from_major(40));
    for id in [alice, bob] {
        assert!(api.engine().audit_account(id).await.unwrap().is_consistent());
    }
    tear_down(db).await;
}
