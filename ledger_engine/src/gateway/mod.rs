//! # Gateway adapter
//!
//! Every external payment gateway speaks its own dialect. This module translates each of them into one
//! [`CanonicalOutcome`] so that the reconciliation layer never has to know which gateway it is talking to.
//!
//! Gateways are a closed set of variants ([`GatewayKind`](crate::db_types::GatewayKind)) and dispatch happens on the
//! variant:
//! * the card gateway hosts a payment page, notifies us with form-encoded callbacks and exposes a validation API that
//!   we treat as the authoritative answer,
//! * the two mobile-wallet gateways post JSON callbacks signed with HMAC-SHA256.
//!
//! [`PaymentGateway`] is the seam between the ledger and the outside world. [`HttpGateways`] is the production
//! implementation. [`GatewayAdapter`] wraps any implementation and bounds every outbound call with a timeout.
mod adapter;
mod card;
mod config;
mod errors;
mod outcome;
mod wallet;

pub use adapter::{GatewayAdapter, HttpGateways, PaymentGateway, PaymentRequest, PaymentSession};
pub use card::{CardCallback, CardGateway};
pub use config::{CallbackUrls, CardGatewayConfig, GatewayConfig, WalletGatewayConfig};
pub use errors::GatewayError;
pub use outcome::{CanonicalOutcome, OutcomeMismatch, PaymentOutcome};
pub use wallet::{sign_message, verify_signature, WalletACallback, WalletBCallback, WalletGateway, WalletVariant};
