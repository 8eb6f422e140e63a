use std::fmt::Display;

use ledger_common::Amount;
use serde::{Deserialize, Serialize};

use crate::db_types::{GatewayKind, GatewayRef, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl Display for PaymentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A gateway result, stripped of everything gateway-specific except which gateway reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalOutcome {
    /// The gateway that reported the outcome. References are only unique within a gateway.
    pub gateway: GatewayKind,
    pub gateway_ref: GatewayRef,
    pub outcome: PaymentOutcome,
    pub amount: Amount,
    pub currency: String,
    /// Free-text failure reason, when the gateway gives one.
    #[serde(default)]
    pub reason: Option<String>,
}

impl CanonicalOutcome {
    pub fn new(
        gateway: GatewayKind,
        gateway_ref: GatewayRef,
        outcome: PaymentOutcome,
        amount: Amount,
        currency: &str,
    ) -> Self {
        Self { gateway, gateway_ref, outcome, amount, currency: currency.to_string(), reason: None }
    }

    pub fn succeeded(gateway: GatewayKind, gateway_ref: GatewayRef, amount: Amount, currency: &str) -> Self {
        Self::new(gateway, gateway_ref, PaymentOutcome::Succeeded, amount, currency)
    }

    pub fn failed(gateway: GatewayKind, gateway_ref: GatewayRef, amount: Amount, currency: &str) -> Self {
        Self::new(gateway, gateway_ref, PaymentOutcome::Failed, amount, currency)
    }

    pub fn cancelled(gateway: GatewayKind, gateway_ref: GatewayRef, amount: Amount, currency: &str) -> Self {
        Self::new(gateway, gateway_ref, PaymentOutcome::Cancelled, amount, currency)
    }

    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Compares the reported amount and currency with what the ledger recorded when the payment was initiated.
    /// Currency codes are compared case-insensitively.
    pub fn check_against(&self, transaction: &Transaction) -> Result<(), OutcomeMismatch> {
        let amount_ok = self.amount == transaction.amount;
        let currency_ok = self.currency.trim().eq_ignore_ascii_case(transaction.currency.trim());
        if amount_ok && currency_ok {
            Ok(())
        } else {
            Err(OutcomeMismatch {
                expected_amount: transaction.amount,
                expected_currency: transaction.currency.clone(),
                reported_amount: self.amount,
                reported_currency: self.currency.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeMismatch {
    pub expected_amount: Amount,
    pub expected_currency: String,
    pub reported_amount: Amount,
    pub reported_currency: String,
}

impl Display for OutcomeMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gateway reported {} {} but the ledger recorded {} {}",
            self.reported_amount, self.reported_currency, self.expected_amount, self.expected_currency
        )
    }
}
