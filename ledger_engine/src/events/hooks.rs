use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    OperatorAlertEvent,
    SubscriptionActivatedEvent,
    TransactionAnnulledEvent,
    TransactionSettledEvent,
};

type BoxedHook = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default, Clone)]
pub struct EventProducers {
    pub transaction_settled_producer: Vec<EventProducer<TransactionSettledEvent>>,
    pub transaction_annulled_producer: Vec<EventProducer<TransactionAnnulledEvent>>,
    pub subscription_activated_producer: Vec<EventProducer<SubscriptionActivatedEvent>>,
    pub operator_alert_producer: Vec<EventProducer<OperatorAlertEvent>>,
}

pub struct EventHandlers {
    pub on_transaction_settled: Option<EventHandler<TransactionSettledEvent>>,
    pub on_transaction_annulled: Option<EventHandler<TransactionAnnulledEvent>>,
    pub on_subscription_activated: Option<EventHandler<SubscriptionActivatedEvent>>,
    pub on_operator_alert: Option<EventHandler<OperatorAlertEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_transaction_settled = hooks.on_transaction_settled.map(|f| EventHandler::new(buffer_size, f));
        let on_transaction_annulled = hooks.on_transaction_annulled.map(|f| EventHandler::new(buffer_size, f));
        let on_subscription_activated = hooks.on_subscription_activated.map(|f| EventHandler::new(buffer_size, f));
        let on_operator_alert = hooks.on_operator_alert.map(|f| EventHandler::new(buffer_size, f));
        Self { on_transaction_settled, on_transaction_annulled, on_subscription_activated, on_operator_alert }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_transaction_settled {
            result.transaction_settled_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_transaction_annulled {
            result.transaction_annulled_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_subscription_activated {
            result.subscription_activated_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_operator_alert {
            result.operator_alert_producer.push(handler.subscribe());
        }
        result
    }

    /// Spawns every configured handler onto the runtime. Each one shuts down when its producers are dropped.
    pub async fn start_handlers(self) {
        spawn_handler(self.on_transaction_settled);
        spawn_handler(self.on_transaction_annulled);
        spawn_handler(self.on_subscription_activated);
        spawn_handler(self.on_operator_alert);
    }
}

fn spawn_handler<E: Send + Sync + 'static>(handler: Option<EventHandler<E>>) {
    if let Some(handler) = handler {
        tokio::spawn(handler.start_handler());
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_transaction_settled: Option<Handler<TransactionSettledEvent>>,
    pub on_transaction_annulled: Option<Handler<TransactionAnnulledEvent>>,
    pub on_subscription_activated: Option<Handler<SubscriptionActivatedEvent>>,
    pub on_operator_alert: Option<Handler<OperatorAlertEvent>>,
}

impl EventHooks {
    pub fn on_transaction_settled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TransactionSettledEvent) -> BoxedHook) + Send + Sync + 'static {
        self.on_transaction_settled = Some(Arc::new(f));
        self
    }

    pub fn on_transaction_annulled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TransactionAnnulledEvent) -> BoxedHook) + Send + Sync + 'static {
        self.on_transaction_annulled = Some(Arc::new(f));
        self
    }

    pub fn on_subscription_activated<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(SubscriptionActivatedEvent) -> BoxedHook) + Send + Sync + 'static {
        self.on_subscription_activated = Some(Arc::new(f));
        self
    }

    pub fn on_operator_alert<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OperatorAlertEvent) -> BoxedHook) + Send + Sync + 'static {
        self.on_operator_alert = Some(Arc::new(f));
        self
    }
}
