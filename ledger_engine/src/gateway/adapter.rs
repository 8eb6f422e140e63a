use std::{future::Future, time::Duration};

use ledger_common::Amount;
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{GatewayKind, GatewayRef, Transaction},
    gateway::{
        CanonicalOutcome,
        CardCallback,
        CardGateway,
        GatewayConfig,
        GatewayError,
        OutcomeMismatch,
        WalletGateway,
        WalletVariant,
    },
};

/// An outbound payment request for a transaction the ledger has already recorded as pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub gateway: GatewayKind,
    pub gateway_ref: GatewayRef,
    pub amount: Amount,
    pub currency: String,
}

impl From<&Transaction> for PaymentRequest {
    fn from(tx: &Transaction) -> Self {
        Self {
            gateway: tx.gateway,
            gateway_ref: tx.gateway_ref.clone(),
            amount: tx.amount,
            currency: tx.currency.clone(),
        }
    }
}

/// The gateway's answer to a payment request: where to send the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub gateway: GatewayKind,
    pub gateway_ref: GatewayRef,
    pub redirect_url: String,
}

/// The capability the ledger needs from the outside world: start a payment, ask how it ended, and read a callback.
#[allow(async_fn_in_trait)]
pub trait PaymentGateway: Clone {
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentSession, GatewayError>;

    /// The gateway's current view of a payment. `Ok(None)` if it has no final answer yet.
    async fn query_status(
        &self,
        gateway: GatewayKind,
        gateway_ref: &GatewayRef,
    ) -> Result<Option<CanonicalOutcome>, GatewayError>;

    /// Parses (and where the gateway signs its callbacks, authenticates) a raw callback body.
    fn normalize(&self, gateway: GatewayKind, payload: &[u8]) -> Result<CanonicalOutcome, GatewayError>;

    /// Whether a callback from this gateway must be confirmed with [`Self::query_status`] before it is trusted.
    fn requires_confirmation(&self, gateway: GatewayKind) -> bool {
        gateway == GatewayKind::Card
    }
}

/// The production gateways, dispatching on [`GatewayKind`].
#[derive(Clone)]
pub struct HttpGateways {
    config: GatewayConfig,
    card: CardGateway,
    wallet_a: WalletGateway,
    wallet_b: WalletGateway,
}

impl HttpGateways {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let card = CardGateway::new(config.card.clone(), config.timeout)?;
        let wallet_a = WalletGateway::new(WalletVariant::A, config.wallet_a.clone(), config.timeout)?;
        let wallet_b = WalletGateway::new(WalletVariant::B, config.wallet_b.clone(), config.timeout)?;
        Ok(Self { config, card, wallet_a, wallet_b })
    }

    fn wallet(&self, gateway: GatewayKind) -> Result<&WalletGateway, GatewayError> {
        match gateway {
            GatewayKind::WalletA => Ok(&self.wallet_a),
            GatewayKind::WalletB => Ok(&self.wallet_b),
            other => Err(GatewayError::Unsupported(other)),
        }
    }
}

impl PaymentGateway for HttpGateways {
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentSession, GatewayError> {
        let urls = self.config.callback_urls(request.gateway)?;
        match request.gateway {
            GatewayKind::Internal => Err(GatewayError::Unsupported(GatewayKind::Internal)),
            GatewayKind::Card => self.card.initiate_payment(request, &urls).await,
            wallet => self.wallet(wallet)?.initiate_payment(request, &urls).await,
        }
    }

    async fn query_status(
        &self,
        gateway: GatewayKind,
        gateway_ref: &GatewayRef,
    ) -> Result<Option<CanonicalOutcome>, GatewayError> {
        match gateway {
            GatewayKind::Internal => Err(GatewayError::Unsupported(GatewayKind::Internal)),
            GatewayKind::Card => self.card.query_status(gateway_ref).await,
            wallet => self.wallet(wallet)?.query_status(gateway_ref).await,
        }
    }

    fn normalize(&self, gateway: GatewayKind, payload: &[u8]) -> Result<CanonicalOutcome, GatewayError> {
        match gateway {
            GatewayKind::Internal => Err(GatewayError::Unsupported(GatewayKind::Internal)),
            GatewayKind::Card => CardCallback::parse(payload)?.into_outcome(),
            wallet => self.wallet(wallet)?.parse_callback(payload),
        }
    }
}

/// Wraps a [`PaymentGateway`] so that no outbound call can block for longer than the configured timeout.
#[derive(Clone)]
pub struct GatewayAdapter<G> {
    gateway: G,
    timeout: Duration,
}

impl<G> GatewayAdapter<G>
where G: PaymentGateway
{
    pub fn new(gateway: G, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, gateway: GatewayKind, call: F) -> Result<T, GatewayError>
    where F: Future<Output = Result<T, GatewayError>> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("🌐 The {gateway} gateway did not answer within {:?}", self.timeout);
                Err(GatewayError::Timeout(gateway, self.timeout))
            },
        }
    }

    pub async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentSession, GatewayError> {
        self.bounded(request.gateway, self.gateway.initiate_payment(request)).await
    }

    pub async fn query_status(
        &self,
        gateway: GatewayKind,
        gateway_ref: &GatewayRef,
    ) -> Result<Option<CanonicalOutcome>, GatewayError> {
        let answer = self.bounded(gateway, self.gateway.query_status(gateway, gateway_ref)).await?;
        Ok(answer.map(|outcome| Self::attributed_to(gateway, outcome)))
    }

    pub fn normalize(&self, gateway: GatewayKind, payload: &[u8]) -> Result<CanonicalOutcome, GatewayError> {
        let outcome = self.gateway.normalize(gateway, payload)?;
        Ok(Self::attributed_to(gateway, outcome))
    }

    /// An outcome belongs to the gateway it was received from, whatever the payload claims.
    fn attributed_to(gateway: GatewayKind, mut outcome: CanonicalOutcome) -> CanonicalOutcome {
        if outcome.gateway != gateway {
            warn!("🌐 {gateway} returned an outcome labelled {}. Treating it as {gateway}'s.", outcome.gateway);
            outcome.gateway = gateway;
        }
        outcome
    }

    /// Turns a raw callback into an outcome the ledger can act on. Gateways whose callbacks are not signed are asked
    /// directly for the final status, and that answer replaces whatever the callback claimed.
    pub async fn authenticate_callback(
        &self,
        gateway: GatewayKind,
        payload: &[u8],
    ) -> Result<CanonicalOutcome, GatewayError> {
        let claimed = self.normalize(gateway, payload)?;
        if !self.gateway.requires_confirmation(gateway) {
            return Ok(claimed);
        }
        trace!("🌐 Confirming {gateway} callback for {} with the gateway", claimed.gateway_ref);
        match self.query_status(gateway, &claimed.gateway_ref).await? {
            Some(confirmed) => {
                if confirmed.outcome != claimed.outcome {
                    info!(
                        "🌐 {gateway} callback for {} claimed {}, but the gateway says {}",
                        claimed.gateway_ref, claimed.outcome, confirmed.outcome
                    );
                }
                Ok(confirmed)
            },
            None => Err(GatewayError::Unconfirmed(claimed.gateway_ref)),
        }
    }

    pub fn check_against(&self, outcome: &CanonicalOutcome, transaction: &Transaction) -> Result<(), OutcomeMismatch> {
        outcome.check_against(transaction)
    }
}
