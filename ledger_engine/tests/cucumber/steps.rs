use chrono::Utc;
use cucumber::{given, then, when};
use ledger_common::Amount;
use ledger_engine::{
    db_types::{GatewayKind, GatewayRef, PlanType, SubscriptionStatus, TransactionKind, TransactionStatus},
    gateway::{CanonicalOutcome, PaymentOutcome},
    AccountManagement,
    LedgerError,
    SubscriptionManagement,
};
use serde_json::json;

use crate::cucumber::LedgerWorld;

async fn account_id(world: &LedgerWorld, user: &str) -> i64 {
    world.api().engine().open_account(user).await.expect("Error opening account").id
}

fn error_name(e: &LedgerError) -> &'static str {
    match e {
        LedgerError::InvalidAmount(_) => "InvalidAmount",
        LedgerError::AccountNotFound(_) => "AccountNotFound",
        LedgerError::InsufficientFunds { .. } => "InsufficientFunds",
        LedgerError::GatewayMismatch { .. } => "GatewayMismatch",
        LedgerError::UnknownTransaction(_) => "UnknownTransaction",
        LedgerError::SubscriptionActivationFailed { .. } => "SubscriptionActivationFailed",
        LedgerError::GatewayTimeout { .. } => "GatewayTimeout",
        LedgerError::AlreadyResolved { .. } => "AlreadyResolved",
        _ => "Other",
    }
}

#[given(expr = "user '{word}' has a balance of {int} BDT")]
async fn seed_balance(world: &mut LedgerWorld, user: String, amount: i64) {
    let id = account_id(world, &user).await;
    world
        .api()
        .engine()
        .adjust_balance(id, TransactionKind::Deposit, Amount::from_major(amount), "seed")
        .await
        .expect("Error seeding balance");
}

#[when(expr = "'{word}' buys a {word} subscription for {int} BDT as [{word}]")]
async fn start_purchase(world: &mut LedgerWorld, user: String, plan: String, amount: i64, label: String) {
    let id = account_id(world, &user).await;
    let result = world
        .api()
        .engine()
        .initiate(id, TransactionKind::SubscriptionPurchase, Amount::from_major(amount), Some(json!({ "plan": plan })))
        .await;
    let tx = world.record_result(result).expect("Error initiating purchase");
    world.system().transactions.insert(label, tx);
}

#[when(expr = "'{word}' starts a {word} of {int} BDT as [{word}]")]
async fn start_transaction(world: &mut LedgerWorld, user: String, kind: String, amount: i64, label: String) {
    let id = account_id(world, &user).await;
    let kind = kind.parse::<TransactionKind>().expect("Not a transaction kind");
    let result = world.api().engine().initiate(id, kind, Amount::from_major(amount), None).await;
    if let Some(tx) = world.record_result(result) {
        world.system().transactions.insert(label, tx);
    }
}

#[when(expr = "transaction [{word}] is settled")]
async fn settle(world: &mut LedgerWorld, label: String) {
    let tx = world.transaction(&label);
    let result = world.api().engine().settle(tx.id).await;
    world.record_result(result);
}

#[when(expr = "the gateway reports [{word}] as {word}")]
async fn gateway_reports(world: &mut LedgerWorld, label: String, outcome: String) {
    let tx = world.transaction(&label);
    let outcome = match outcome.as_str() {
        "succeeded" => PaymentOutcome::Succeeded,
        "failed" => PaymentOutcome::Failed,
        "cancelled" => PaymentOutcome::Cancelled,
        other => panic!("Unknown outcome {other}"),
    };
    let outcome = CanonicalOutcome::new(tx.gateway, tx.gateway_ref.clone(), outcome, tx.amount, &tx.currency);
    let result = world.api().reconcile(&outcome).await;
    world.record_result(result);
}

#[when(expr = "the gateway reports [{word}] as succeeded for {int} BDT")]
async fn gateway_reports_amount(world: &mut LedgerWorld, label: String, amount: i64) {
    let tx = world.transaction(&label);
    let reported = Amount::from_major(amount);
    let outcome = CanonicalOutcome::succeeded(tx.gateway, tx.gateway_ref.clone(), reported, &tx.currency);
    let result = world.api().reconcile(&outcome).await;
    world.record_result(result);
}

#[when(expr = "a success callback arrives for unknown reference {word}")]
async fn unknown_callback(world: &mut LedgerWorld, gateway_ref: String) {
    let gateway_ref = GatewayRef::from(gateway_ref);
    let outcome = CanonicalOutcome::succeeded(GatewayKind::Card, gateway_ref, Amount::from_major(100), "BDT");
    let result = world.api().reconcile(&outcome).await;
    world.record_result(result);
}

#[given(expr = "'{word}' had a {word} subscription that lapsed {int} days ago")]
async fn lapsed_subscription(world: &mut LedgerWorld, user: String, plan: String, days_ago: i64) {
    let plan = plan.parse::<PlanType>().expect("Not a plan");
    let id = account_id(world, &user).await;
    let engine = world.api().engine();
    engine.adjust_balance(id, TransactionKind::Deposit, Amount::from_major(100), "seed").await.expect("seed");
    let tx = engine
        .initiate(id, TransactionKind::SubscriptionPurchase, Amount::from_major(100), Some(json!({ "plan": plan })))
        .await
        .expect("Error initiating purchase");
    engine.settle(tx.id).await.expect("Error settling purchase");
    let started = Utc::now() - plan.duration() - chrono::Duration::days(days_ago);
    world
        .system()
        .db
        .activate_subscription(&user, plan, plan.duration_days(), tx.id, started)
        .await
        .expect("Error activating subscription");
}

#[when("the expiry sweep runs")]
async fn expiry_sweep(world: &mut LedgerWorld) {
    let result = world.api().subscriptions().expire().await;
    world.record_result(result);
}

#[then(expr = "transaction [{word}] is {word}")]
async fn check_status(world: &mut LedgerWorld, label: String, status: String) {
    let tx = world.transaction(&label);
    let expected = status.parse::<TransactionStatus>().expect("Not a transaction status");
    let tx = world.system().db.fetch_transaction(tx.id).await.expect("Error fetching transaction").expect("Missing");
    assert_eq!(tx.status, expected);
}

#[then(expr = "the balance of '{word}' is {int} BDT")]
async fn check_balance(world: &mut LedgerWorld, user: String, amount: i64) {
    let account = world.api().engine().account_for_user(&user).await.expect("Error fetching account");
    let balance = account.map(|a| a.balance).unwrap_or_default();
    assert_eq!(balance, Amount::from_major(amount));
}

#[then(expr = "'{word}' is premium for {int} days")]
async fn check_premium(world: &mut LedgerWorld, user: String, days: i64) {
    let status = world.api().subscriptions().status(&user).await.expect("Error fetching status");
    assert!(status.is_premium, "{user} is not premium");
    assert_eq!(status.days_remaining, days);
}

#[then(expr = "'{word}' is not premium")]
async fn check_not_premium(world: &mut LedgerWorld, user: String) {
    let status = world.api().subscriptions().status(&user).await.expect("Error fetching status");
    assert!(!status.is_premium, "{user} is premium");
}

#[then(expr = "'{word}' has {int} expired subscription(s)")]
async fn check_expired(world: &mut LedgerWorld, user: String, count: usize) {
    let subs = world.system().db.fetch_subscriptions_for_user(&user).await.expect("Error fetching subscriptions");
    assert_eq!(subs.iter().filter(|s| s.status == SubscriptionStatus::Expired).count(), count);
}

#[then(expr = "the last call failed with {word}")]
async fn check_error(world: &mut LedgerWorld, expected: String) {
    let err = world.system().last_error.as_ref().expect("The last call did not fail");
    assert_eq!(error_name(err), expected, "{err}");
}

#[then("the last call succeeded")]
async fn check_success(world: &mut LedgerWorld) {
    let err = world.system().last_error.as_ref();
    assert!(err.is_none(), "{err:?}");
}

#[then(expr = "the books balance for '{word}'")]
async fn check_audit(world: &mut LedgerWorld, user: String) {
    let id = account_id(world, &user).await;
    let report = world.api().engine().audit_account(id).await.expect("Error auditing account");
    assert!(report.is_consistent(), "{report:?}");
}

#[then(expr = "there is/are {int} open operator alert(s)")]
async fn check_alerts(world: &mut LedgerWorld, count: usize) {
    let alerts = world.system().db.fetch_alerts(false).await.expect("Error fetching alerts");
    assert_eq!(alerts.len(), count);
}
