use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use ledger_common::Amount;
use ledger_engine::{
    db_types::{GatewayKind, TransactionKind},
    events::{EventHandlers, EventHooks},
    gateway::{CanonicalOutcome, GatewayAdapter},
    test_utils::{
        prepare_env::{fresh_database, tear_down},
        simulated_gateway::SimulatedGateway,
    },
    ReconciliationApi,
};
use log::*;
use serde_json::json;
use tokio::runtime::Runtime;

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
}

impl HookCalled {
    pub fn called(&self) {
        let _ = self.called.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> i32 {
        self.called.load(Ordering::SeqCst)
    }
}

#[test]
fn hooks_fire_for_settlements_activations_and_alerts() {
    let rt = Runtime::new().unwrap();
    let settled = HookCalled::default();
    let annulled = HookCalled::default();
    let activated = HookCalled::default();
    let alerts = HookCalled::default();
    let (s, an, ac, al) = (settled.clone(), annulled.clone(), activated.clone(), alerts.clone());
    rt.block_on(async move {
        let db = fresh_database().await;
        let mut hooks = EventHooks::default();
        hooks
            .on_transaction_settled(move |ev| {
                info!("🪝️ settled: #{}", ev.transaction.id);
                s.called();
                Box::pin(async {})
            })
            .on_transaction_annulled(move |ev| {
                info!("🪝️ annulled: #{} is {}", ev.transaction.id, ev.status);
                an.called();
                Box::pin(async {})
            })
            .on_subscription_activated(move |ev| {
                info!("🪝️ activated: #{} (extended: {})", ev.subscription.id, ev.extended);
                ac.called();
                Box::pin(async {})
            })
            .on_operator_alert(move |ev| {
                info!("🪝️ alert: {}", ev.alert.detail);
                al.called();
                Box::pin(async {})
            });
        let handlers = EventHandlers::new(16, hooks);
        let producers = handlers.producers();
        handlers.start_handlers().await;

        let gateway = GatewayAdapter::new(SimulatedGateway::new(), Duration::from_millis(250));
        let api = ReconciliationApi::new(db.clone(), gateway, producers);
        let account = api.engine().open_account("alice").await.unwrap();
        // settled #1
        api.engine().adjust_balance(account.id, TransactionKind::Deposit, Amount::from_major(300), "seed").await.unwrap();
        let purchase = api
            .engine()
            .initiate(account.id, TransactionKind::SubscriptionPurchase, Amount::from_major(100), Some(json!({"plan": "weekly"})))
            .await
            .unwrap();
        let outcome =
            CanonicalOutcome::succeeded(purchase.gateway, purchase.gateway_ref.clone(), purchase.amount, "BDT");
        // settled #2 and one activation. The replay notifies nobody.
        api.reconcile(&outcome).await.unwrap();
        api.reconcile(&outcome).await.unwrap();
        // annulled #1
        let doomed = api.engine().initiate(account.id, TransactionKind::Deposit, Amount::from_major(5), None).await.unwrap();
        api.engine().cancel(doomed.id).await.unwrap();
        // alert #1
        let ghost_ref = "WLA-20260101000000-000000000000".into();
        let ghost = CanonicalOutcome::succeeded(GatewayKind::WalletA, ghost_ref, Amount::from(1), "BDT");
        assert!(api.reconcile(&ghost).await.is_err());

        drop(api);
        tokio::time::sleep(Duration::from_millis(250)).await;
        tear_down(db).await;
    });
    assert_eq!(settled.count(), 2);
    assert_eq!(annulled.count(), 1);
    assert_eq!(activated.count(), 1);
    assert_eq!(alerts.count(), 1);
}
