//! Mobile-wallet gateways.
//!
//! Both wallets share the same flow: we POST a signed JSON checkout request and get back a URL to redirect the user
//! to, then the wallet posts a signed JSON notification when the payment completes. They differ in field names,
//! status vocabularies and in what exactly is signed.
//!
//! Signatures are base64-encoded HMAC-SHA256 over a pipe-separated message, keyed with the shared secret for that
//! wallet.
use std::time::Duration;

use hmac::{Hmac, Mac};
use ledger_common::{Amount, Secret};
use log::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

use super::config::{endpoint, CallbackUrls, WalletGatewayConfig};
use crate::{
    db_types::{GatewayKind, GatewayRef},
    gateway::{CanonicalOutcome, GatewayError, PaymentOutcome, PaymentRequest, PaymentSession},
};

type HmacSha256 = Hmac<Sha256>;

pub fn sign_message(secret: &Secret<String>, message: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.reveal().as_bytes())
        .map_err(|e| GatewayError::Configuration(format!("Invalid HMAC key: {e}")))?;
    mac.update(message.as_bytes());
    Ok(base64::encode(mac.finalize().into_bytes()))
}

/// Checks a base64 signature over `message`. The comparison is constant-time.
pub fn verify_signature(
    gateway: GatewayKind,
    secret: &Secret<String>,
    message: &str,
    signature: &str,
) -> Result<(), GatewayError> {
    if secret.is_empty() {
        warn!("🌐 No signing secret is configured for {gateway}. Refusing its callbacks.");
        return Err(GatewayError::InvalidSignature(gateway));
    }
    let provided = base64::decode(signature.trim()).map_err(|_| GatewayError::InvalidSignature(gateway))?;
    let mut mac = HmacSha256::new_from_slice(secret.reveal().as_bytes())
        .map_err(|e| GatewayError::Configuration(format!("Invalid HMAC key: {e}")))?;
    mac.update(message.as_bytes());
    mac.verify_slice(&provided).map_err(|_| {
        warn!("🌐 Invalid {gateway} callback signature.");
        GatewayError::InvalidSignature(gateway)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletVariant {
    A,
    B,
}

impl WalletVariant {
    pub fn gateway(&self) -> GatewayKind {
        match self {
            Self::A => GatewayKind::WalletA,
            Self::B => GatewayKind::WalletB,
        }
    }
}

/// Wallet A notification. Signed message: `merchant_invoice|trx_status|amount|currency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletACallback {
    pub payment_id: String,
    pub merchant_invoice: String,
    /// `Completed`, `Failed`, `Cancelled`, or `Initiated` while the user is still paying
    pub trx_status: String,
    pub amount: String,
    pub currency: String,
    pub signature: String,
}

impl WalletACallback {
    pub fn signing_message(&self) -> String {
        format!("{}|{}|{}|{}", self.merchant_invoice, self.trx_status, self.amount, self.currency)
    }

    fn outcome(&self) -> Option<PaymentOutcome> {
        match self.trx_status.trim().to_ascii_lowercase().as_str() {
            "completed" => Some(PaymentOutcome::Succeeded),
            "failed" => Some(PaymentOutcome::Failed),
            "cancelled" | "canceled" => Some(PaymentOutcome::Cancelled),
            _ => None,
        }
    }
}

/// Wallet B notification. Signed message: `order_id|status_code|amount|currency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBCallback {
    pub order_id: String,
    pub issuer_payment_ref: Option<String>,
    /// `000` success, `001` failed, `002` cancelled by the user, `100` in progress
    pub status_code: String,
    #[serde(default)]
    pub status_message: Option<String>,
    pub amount: String,
    pub currency: String,
    pub sign: String,
}

impl WalletBCallback {
    pub fn signing_message(&self) -> String {
        format!("{}|{}|{}|{}", self.order_id, self.status_code, self.amount, self.currency)
    }

    fn outcome(&self) -> Option<PaymentOutcome> {
        match self.status_code.trim() {
            "000" => Some(PaymentOutcome::Succeeded),
            "001" => Some(PaymentOutcome::Failed),
            "002" => Some(PaymentOutcome::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    #[serde(alias = "checkout_url", alias = "redirect_url")]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct WalletGateway {
    variant: WalletVariant,
    config: WalletGatewayConfig,
    client: Client,
}

impl WalletGateway {
    pub fn new(variant: WalletVariant, config: WalletGatewayConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Could not build the wallet gateway client: {e}")))?;
        Ok(Self { variant, config, client })
    }

    pub fn gateway(&self) -> GatewayKind {
        self.variant.gateway()
    }

    /// Verifies the signature on a notification and translates it. A notification for a payment that is still in
    /// progress is reported as [`GatewayError::Unconfirmed`].
    pub fn parse_callback(&self, payload: &[u8]) -> Result<CanonicalOutcome, GatewayError> {
        let gateway = self.gateway();
        let invalid = |e: serde_json::Error| GatewayError::InvalidPayload(format!("{gateway} callback: {e}"));
        let (gateway_ref, outcome, amount, currency, reason) = match self.variant {
            WalletVariant::A => {
                let cb: WalletACallback = serde_json::from_slice(payload).map_err(invalid)?;
                verify_signature(gateway, &self.config.secret, &cb.signing_message(), &cb.signature)?;
                (cb.merchant_invoice.clone(), cb.outcome(), cb.amount, cb.currency, None)
            },
            WalletVariant::B => {
                let cb: WalletBCallback = serde_json::from_slice(payload).map_err(invalid)?;
                verify_signature(gateway, &self.config.secret, &cb.signing_message(), &cb.sign)?;
                (cb.order_id.clone(), cb.outcome(), cb.amount, cb.currency, cb.status_message)
            },
        };
        let Some(outcome) = outcome else {
            trace!("🌐 {gateway} reports {gateway_ref} as still in progress");
            return Err(GatewayError::Unconfirmed(GatewayRef::from(gateway_ref)));
        };
        let amount = amount
            .parse::<Amount>()
            .map_err(|e| GatewayError::InvalidPayload(format!("Invalid amount '{amount}': {e}")))?;
        let mut result = CanonicalOutcome::new(gateway, GatewayRef::from(gateway_ref), outcome, amount, &currency);
        if outcome != PaymentOutcome::Succeeded {
            result.reason = reason;
        }
        Ok(result)
    }

    pub async fn initiate_payment(
        &self,
        request: &PaymentRequest,
        urls: &CallbackUrls,
    ) -> Result<PaymentSession, GatewayError> {
        let gateway = self.gateway();
        let amount = request.amount.to_string();
        let reference = request.gateway_ref.as_str();
        let body = match self.variant {
            WalletVariant::A => json!({
                "merchant_invoice": reference,
                "amount": amount,
                "currency": request.currency,
                "callback_url": urls.ipn.as_str(),
                "success_url": urls.success.as_str(),
                "failure_url": urls.fail.as_str(),
                "cancel_url": urls.cancel.as_str(),
            }),
            WalletVariant::B => json!({
                "order_id": reference,
                "amount": amount,
                "currency": request.currency,
                "notify_url": urls.ipn.as_str(),
                "return_url": urls.success.as_str(),
                "fail_url": urls.fail.as_str(),
                "cancel_url": urls.cancel.as_str(),
            }),
        };
        let signature = sign_message(&self.config.secret, &format!("{reference}|{amount}|{}", request.currency))?;
        let url = endpoint(&self.config.api_url, "checkout/create")?;
        trace!("🌐 Requesting a {gateway} checkout for {reference}");
        let response = self.client.post(url).header("X-Signature", signature).json(&body).send().await?;
        let status = response.status();
        let checkout = response.json::<CheckoutResponse>().await?;
        match checkout.url {
            Some(redirect_url) if status.is_success() => {
                debug!("🌐 {gateway} checkout created for {reference}");
                Ok(PaymentSession { gateway, gateway_ref: request.gateway_ref.clone(), redirect_url })
            },
            _ => {
                let reason = checkout.error.unwrap_or_else(|| format!("HTTP {status}"));
                warn!("🌐 {gateway} refused to create a checkout for {reference}: {reason}");
                Err(GatewayError::Rejected(reason))
            },
        }
    }

    /// The status endpoint answers with the same signed document as the notification.
    pub async fn query_status(&self, gateway_ref: &GatewayRef) -> Result<Option<CanonicalOutcome>, GatewayError> {
        let url = endpoint(&self.config.api_url, &format!("checkout/status/{gateway_ref}"))?;
        let signature = sign_message(&self.config.secret, gateway_ref.as_str())?;
        let response = self.client.get(url).header("X-Signature", signature).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("🌐 {} has no record of {gateway_ref}", self.gateway());
            return Ok(None);
        }
        let body = response.error_for_status()?.bytes().await?;
        match self.parse_callback(&body) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(GatewayError::Unconfirmed(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
