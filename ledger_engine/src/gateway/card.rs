//! Hosted card-payment page.
//!
//! The flow is: we POST a session request and get back a `GatewayPageURL` to send the user to. When the user is done,
//! the gateway redirects the browser to one of our success/fail/cancel URLs and separately posts an IPN to us. Both
//! arrive as `application/x-www-form-urlencoded` bodies. Neither is signed, so a `VALID` status in a callback is only
//! a hint: the validation API is queried for the authoritative answer.
use std::time::Duration;

use ledger_common::Amount;
use log::*;
use reqwest::Client;
use serde::Deserialize;

use super::config::{endpoint, CallbackUrls, CardGatewayConfig};
use crate::{
    db_types::{GatewayKind, GatewayRef},
    gateway::{CanonicalOutcome, GatewayError, PaymentOutcome, PaymentRequest, PaymentSession},
};

const SESSION_PATH: &str = "gwprocess/v4/api.php";
const VALIDATION_PATH: &str = "validator/api/merchantTransIDvalidationAPI.php";

#[derive(Clone)]
pub struct CardGateway {
    config: CardGatewayConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    status: String,
    #[serde(default)]
    failedreason: Option<String>,
    #[serde(rename = "GatewayPageURL", default)]
    gateway_page_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    #[serde(rename = "APIConnect")]
    api_connect: String,
    #[serde(default)]
    element: Vec<ValidationElement>,
}

#[derive(Debug, Deserialize)]
struct ValidationElement {
    tran_id: String,
    status: String,
    amount: String,
    currency: String,
    #[serde(default)]
    error: Option<String>,
}

/// The fields of a card callback or IPN that the ledger cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardCallback {
    pub tran_id: String,
    pub status: String,
    pub amount: String,
    pub currency: String,
    pub val_id: Option<String>,
    pub error: Option<String>,
}

impl CardCallback {
    pub fn parse(payload: &[u8]) -> Result<Self, GatewayError> {
        let mut tran_id = None;
        let mut status = None;
        let mut amount = None;
        let mut currency = None;
        let mut val_id = None;
        let mut error = None;
        for (key, value) in url::form_urlencoded::parse(payload) {
            let value = value.into_owned();
            match key.as_ref() {
                "tran_id" => tran_id = Some(value),
                "status" => status = Some(value),
                "amount" => amount = Some(value),
                "currency" => currency = Some(value),
                "val_id" => val_id = Some(value),
                "error" => error = Some(value),
                _ => {},
            }
        }
        let missing = |field: &str| GatewayError::InvalidPayload(format!("Card callback is missing '{field}'"));
        Ok(Self {
            tran_id: tran_id.ok_or_else(|| missing("tran_id"))?,
            status: status.ok_or_else(|| missing("status"))?,
            amount: amount.ok_or_else(|| missing("amount"))?,
            currency: currency.ok_or_else(|| missing("currency"))?,
            val_id,
            error,
        })
    }

    pub fn into_outcome(self) -> Result<CanonicalOutcome, GatewayError> {
        let outcome = card_status(&self.status).ok_or_else(|| GatewayError::Unconfirmed(self.tran_id.as_str().into()))?;
        let amount = parse_amount(&self.amount)?;
        let mut result = CanonicalOutcome::new(GatewayKind::Card, self.tran_id.into(), outcome, amount, &self.currency);
        result.reason = self.error;
        Ok(result)
    }
}

/// `None` means the gateway has not reached a final answer yet.
fn card_status(status: &str) -> Option<PaymentOutcome> {
    match status.trim().to_ascii_uppercase().as_str() {
        "VALID" | "VALIDATED" => Some(PaymentOutcome::Succeeded),
        "FAILED" | "INVALID_TRANSACTION" | "EXPIRED" => Some(PaymentOutcome::Failed),
        "CANCELLED" | "UNATTEMPTED" => Some(PaymentOutcome::Cancelled),
        _ => None,
    }
}

fn parse_amount(s: &str) -> Result<Amount, GatewayError> {
    s.parse::<Amount>().map_err(|e| GatewayError::InvalidPayload(format!("Invalid amount '{s}': {e}")))
}

impl CardGateway {
    pub fn new(config: CardGatewayConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Could not build the card gateway client: {e}")))?;
        Ok(Self { config, client })
    }

    pub async fn initiate_payment(
        &self,
        request: &PaymentRequest,
        urls: &CallbackUrls,
    ) -> Result<PaymentSession, GatewayError> {
        let url = endpoint(&self.config.api_url, SESSION_PATH)?;
        let amount = request.amount.to_string();
        let params = [
            ("store_id", self.config.store_id.as_str()),
            ("store_passwd", self.config.store_password.reveal().as_str()),
            ("total_amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("tran_id", request.gateway_ref.as_str()),
            ("success_url", urls.success.as_str()),
            ("fail_url", urls.fail.as_str()),
            ("cancel_url", urls.cancel.as_str()),
            ("ipn_url", urls.ipn.as_str()),
        ];
        trace!("🌐 Requesting a card payment session for {}", request.gateway_ref);
        let response = self.client.post(url).form(&params).send().await?.error_for_status()?;
        let session = response.json::<SessionResponse>().await?;
        match (session.status.as_str(), session.gateway_page_url) {
            ("SUCCESS", Some(page)) if !page.is_empty() => {
                debug!("🌐 Card payment session created for {}", request.gateway_ref);
                Ok(PaymentSession {
                    gateway: GatewayKind::Card,
                    gateway_ref: request.gateway_ref.clone(),
                    redirect_url: page,
                })
            },
            (status, _) => {
                let reason = session.failedreason.unwrap_or_else(|| format!("status {status}"));
                warn!("🌐 Card gateway refused to create a session for {}: {reason}", request.gateway_ref);
                Err(GatewayError::Rejected(reason))
            },
        }
    }

    /// Asks the validation API for the final status of a payment. `Ok(None)` means the gateway has no final answer
    /// yet, including the case where it has never heard of the reference.
    pub async fn query_status(&self, gateway_ref: &GatewayRef) -> Result<Option<CanonicalOutcome>, GatewayError> {
        let url = endpoint(&self.config.api_url, VALIDATION_PATH)?;
        let params = [
            ("tran_id", gateway_ref.as_str()),
            ("store_id", self.config.store_id.as_str()),
            ("store_passwd", self.config.store_password.reveal().as_str()),
            ("format", "json"),
        ];
        let response = self.client.get(url).query(&params).send().await?.error_for_status()?;
        let validation = response.json::<ValidationResponse>().await?;
        if validation.api_connect != "DONE" {
            return Err(GatewayError::Rejected(format!("Validation API answered {}", validation.api_connect)));
        }
        let outcome = best_outcome(validation.element, gateway_ref)?;
        trace!(
            "🌐 Card validation for {gateway_ref}: {}",
            outcome.as_ref().map(|o| o.outcome.to_string()).unwrap_or_else(|| "pending".into())
        );
        Ok(outcome)
    }
}

/// A reference can have several attempts on the gateway side (e.g. a declined card, then a good one). Any successful
/// attempt wins, then any final failure.
fn best_outcome(
    elements: Vec<ValidationElement>,
    gateway_ref: &GatewayRef,
) -> Result<Option<CanonicalOutcome>, GatewayError> {
    let mut best: Option<CanonicalOutcome> = None;
    for element in elements.into_iter().filter(|e| e.tran_id == gateway_ref.as_str()) {
        let Some(outcome) = card_status(&element.status) else {
            continue;
        };
        let amount = parse_amount(&element.amount)?;
        let mut candidate = CanonicalOutcome::new(GatewayKind::Card, gateway_ref.clone(), outcome, amount, &element.currency);
        candidate.reason = element.error;
        let replace = match &best {
            None => true,
            Some(b) => b.outcome != PaymentOutcome::Succeeded && outcome == PaymentOutcome::Succeeded,
        };
        if replace {
            best = Some(candidate);
        }
    }
    Ok(best)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_ipn() {
        let body = b"tran_id=CRD-20260301101010-AABBCCDDEEFF&val_id=2603011010&amount=150.00&card_type=VISA&\
                     store_amount=146.25&currency=BDT&status=VALID";
        let callback = CardCallback::parse(body).unwrap();
        assert_eq!(callback.val_id.as_deref(), Some("2603011010"));
        let outcome = callback.into_outcome().unwrap();
        assert_eq!(outcome.outcome, PaymentOutcome::Succeeded);
        assert_eq!(outcome.amount, Amount::from(15_000));
        assert_eq!(outcome.currency, "BDT");
        assert_eq!(outcome.gateway_ref.as_str(), "CRD-20260301101010-AABBCCDDEEFF");
    }

    #[test]
    fn parse_failed_callback_with_reason() {
        let body = b"tran_id=CRD-1&amount=10.50&currency=BDT&status=FAILED&error=Card%20declined";
        let outcome = CardCallback::parse(body).unwrap().into_outcome().unwrap();
        assert_eq!(outcome.outcome, PaymentOutcome::Failed);
        assert_eq!(outcome.reason.as_deref(), Some("Card declined"));
        assert_eq!(outcome.amount, Amount::from(1050));
    }

    #[test]
    fn incomplete_or_pending_callbacks_are_rejected() {
        assert!(matches!(CardCallback::parse(b"status=VALID&amount=1.00"), Err(GatewayError::InvalidPayload(_))));
        let pending = CardCallback::parse(b"tran_id=CRD-2&amount=1.00&currency=BDT&status=PENDING").unwrap();
        assert!(matches!(pending.into_outcome(), Err(GatewayError::Unconfirmed(_))));
    }

    #[test]
    fn successful_attempt_wins() {
        let r = GatewayRef::from("CRD-3");
        let element = |status: &str| ValidationElement {
            tran_id: "CRD-3".into(),
            status: status.into(),
            amount: "20.00".into(),
            currency: "BDT".into(),
            error: None,
        };
        let best = best_outcome(vec![element("FAILED"), element("VALIDATED"), element("PENDING")], &r).unwrap();
        assert_eq!(best.unwrap().outcome, PaymentOutcome::Succeeded);
        assert!(best_outcome(vec![element("PENDING")], &r).unwrap().is_none());
    }
}
