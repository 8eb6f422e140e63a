//! Fan-in event channel
//!
//! Any number of [`EventProducer`]s feed a single [`EventHandler`]. Each received event is dispatched to the hook on
//! its own task, so a slow hook never holds up the ledger. Hooks only ever see the event value; they have no handle
//! on the ledger itself.
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::{sync::mpsc, task::JoinSet};

/// An async hook invoked once per event.
pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    inbox: mpsc::Receiver<E>,
    outbox: mpsc::Sender<E>,
    hook: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (outbox, inbox) = mpsc::channel(buffer_size);
        Self { inbox, outbox, hook: handler }
    }

    /// Hands out a new producer for this channel.
    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.outbox.clone())
    }

    /// Dispatches events until every producer has been dropped. Returns once all dispatched hooks have completed.
    pub async fn start_handler(self) {
        let Self { mut inbox, outbox, hook } = self;
        // Our own sender would keep the channel open forever.
        drop(outbox);
        debug!("📬️ Event handler listening");
        let mut in_flight = JoinSet::new();
        while let Some(event) = inbox.recv().await {
            let hook = Arc::clone(&hook);
            in_flight.spawn(async move { hook(event).await });
            // Reap finished hooks as we go so the set does not grow unbounded.
            while in_flight.try_join_next().is_some() {}
        }
        trace!("📬️ All producers gone. {} hooks still running", in_flight.len());
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!("📬️ An event hook did not complete: {e}");
            }
        }
        debug!("📬️ Event handler stopped");
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    outbox: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { outbox: sender }
    }

    /// Publishing never fails the caller. A closed channel is logged and the event is dropped.
    pub async fn publish_event(&self, event: E) {
        if self.outbox.send(event).await.is_err() {
            error!("📬️ Event dropped: the handler for this channel has shut down");
        }
    }
}
