use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use log::*;

use crate::{
    db_types::{GatewayKind, GatewayRef},
    gateway::{CanonicalOutcome, GatewayError, PaymentGateway, PaymentRequest, PaymentSession},
};

/// An in-memory gateway whose answers are scripted by the test.
///
/// Callbacks are the JSON form of a [`CanonicalOutcome`]. Status queries return whatever outcome has been scripted
/// for the reference with [`Self::set_outcome`], or `None`.
#[derive(Clone, Default)]
pub struct SimulatedGateway {
    outcomes: Arc<Mutex<HashMap<GatewayRef, CanonicalOutcome>>>,
    initiated: Arc<AtomicUsize>,
    delay: Option<Duration>,
    reject_initiation: bool,
    confirm_callbacks: bool,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering. Use it to provoke timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn rejecting_payments(mut self) -> Self {
        self.reject_initiation = true;
        self
    }

    /// Callbacks must be confirmed with a status query before they are trusted.
    pub fn confirming_callbacks(mut self) -> Self {
        self.confirm_callbacks = true;
        self
    }

    pub fn set_outcome(&self, outcome: CanonicalOutcome) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.insert(outcome.gateway_ref.clone(), outcome);
        }
    }

    pub fn initiated_count(&self) -> usize {
        self.initiated.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl PaymentGateway for SimulatedGateway {
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentSession, GatewayError> {
        self.pause().await;
        if self.reject_initiation {
            return Err(GatewayError::Rejected(format!("{} was declined", request.gateway_ref)));
        }
        self.initiated.fetch_add(1, Ordering::SeqCst);
        trace!("🌐 Simulated {} session for {}", request.gateway, request.gateway_ref);
        Ok(PaymentSession {
            gateway: request.gateway,
            gateway_ref: request.gateway_ref.clone(),
            redirect_url: format!("https://gateway.test/pay/{}", request.gateway_ref),
        })
    }

    async fn query_status(
        &self,
        _gateway: GatewayKind,
        gateway_ref: &GatewayRef,
    ) -> Result<Option<CanonicalOutcome>, GatewayError> {
        self.pause().await;
        let outcomes = self.outcomes.lock().map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(outcomes.get(gateway_ref).cloned())
    }

    fn normalize(&self, gateway: GatewayKind, payload: &[u8]) -> Result<CanonicalOutcome, GatewayError> {
        if gateway == GatewayKind::Internal {
            return Err(GatewayError::Unsupported(gateway));
        }
        serde_json::from_slice(payload).map_err(|e| GatewayError::InvalidPayload(e.to_string()))
    }

    fn requires_confirmation(&self, _gateway: GatewayKind) -> bool {
        self.confirm_callbacks
    }
}
