use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
pub use ledger_common::Amount;
use log::warn;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid {kind}: {value}")]
pub struct ConversionError {
    kind: &'static str,
    value: String,
}

impl ConversionError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

//--------------------------------------       Account       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    pub balance: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------   TransactionKind   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Money coming into the wallet from an external gateway.
    Deposit,
    /// Wallet funds spent on a premium subscription.
    SubscriptionPurchase,
    /// Wallet funds sent to another account.
    TransferOut,
    /// Wallet funds received from another account.
    TransferIn,
    /// Money returned to the wallet.
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
}

impl TransactionKind {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Deposit | Self::TransferIn | Self::Refund => Direction::Credit,
            Self::SubscriptionPurchase | Self::TransferOut => Direction::Debit,
        }
    }

    pub fn is_credit(&self) -> bool {
        self.direction() == Direction::Credit
    }

    /// The signed change to the account balance if a transaction of this kind settles.
    pub fn balance_delta(&self, amount: Amount) -> Amount {
        match self.direction() {
            Direction::Credit => amount,
            Direction::Debit => -amount,
        }
    }
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Deposit => "deposit",
            Self::SubscriptionPurchase => "subscription_purchase",
            Self::TransferOut => "transfer_out",
            Self::TransferIn => "transfer_in",
            Self::Refund => "refund",
        };
        f.write_str(s)
    }
}

impl FromStr for TransactionKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "deposit" => Ok(Self::Deposit),
            "subscription_purchase" => Ok(Self::SubscriptionPurchase),
            "transfer_out" => Ok(Self::TransferOut),
            "transfer_in" => Ok(Self::TransferIn),
            "refund" => Ok(Self::Refund),
            _ => Err(ConversionError::new("transaction kind", s)),
        }
    }
}

//--------------------------------------  TransactionStatus  ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, waiting for the gateway (or the engine) to decide the outcome.
    Pending,
    /// The balance delta has been applied.
    Settled,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Settled => "settled",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TransactionStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "settled" => Ok(Self::Settled),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(ConversionError::new("transaction status", s)),
        }
    }
}

//--------------------------------------     GatewayKind---------------------------------------------------------
/// The payment gateway a transaction is routed through. `Internal` transactions never leave the ledger (balance
/// adjustments, wallet-to-wallet transfers, wallet-funded purchases).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Internal,
    /// Hosted card-payment page with IPN and a validation API.
    Card,
    /// Mobile-wallet simulator A
    WalletA,
    /// Mobile-wallet simulator B
    WalletB,
}

impl GatewayKind {
    pub fn is_external(&self) -> bool {
        !matches!(self, Self::Internal)
    }

    fn ref_prefix(&self) -> &'static str {
        match self {
            Self::Internal => "INT",
            Self::Card => "CRD",
            Self::WalletA => "WLA",
            Self::WalletB => "WLB",
        }
    }
}

impl Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Internal => "internal",
            Self::Card => "card",
            Self::WalletA => "wallet_a",
            Self::WalletB => "wallet_b",
        };
        f.write_str(s)
    }
}

impl FromStr for GatewayKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "internal" => Ok(Self::Internal),
            "card" => Ok(Self::Card),
            "wallet_a" => Ok(Self::WalletA),
            "wallet_b" => Ok(Self::WalletB),
            _ => Err(ConversionError::new("gateway", s)),
        }
    }
}

//--------------------------------------     GatewayRef      ---------------------------------------------------------
/// The external correlation id for a transaction. It is generated by the ledger and handed to the gateway, which
/// echoes it back in callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct GatewayRef(pub String);

impl GatewayRef {
    pub fn generate(gateway: GatewayKind) -> Self {
        let mut nonce = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = nonce.iter().map(|b| format!("{b:02X}")).collect::<String>();
        Self(format!("{}-{}-{nonce}", gateway.ref_prefix(), Utc::now().format("%Y%m%d%H%M%S")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for GatewayRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GatewayRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for GatewayRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

//--------------------------------------     Transaction     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub kind: TransactionKind,
    /// Always positive. The direction comes from `kind`.
    pub amount: Amount,
    pub currency: String,
    pub status: TransactionStatus,
    pub gateway: GatewayKind,
    pub gateway_ref: GatewayRef,
    /// Free-form JSON supplied at initiation, e.g. `{"plan": "monthly"}` for subscription purchases.
    pub metadata: Option<String>,
    pub failure_reason: Option<String>,
    /// Set when the user asked to cancel while the transaction was still pending. Advisory only.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn metadata_json(&self) -> Option<Value> {
        let raw = self.metadata.as_deref()?;
        serde_json::from_str(raw)
            .map_err(|e| warn!("💸 Transaction #{} carries unparseable metadata: {e}", self.id))
            .ok()
    }

    /// The subscription plan recorded in the metadata of a subscription purchase.
    pub fn plan(&self) -> Result<PlanType, ConversionError> {
        let plan = self
            .metadata_json()
            .and_then(|m| m.get("plan").and_then(|p| p.as_str()).map(String::from))
            .ok_or_else(|| ConversionError::new("subscription plan", "<missing>"))?;
        plan.parse()
    }
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: i64,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub currency: String,
    pub gateway: GatewayKind,
    pub gateway_ref: GatewayRef,
    pub metadata: Option<Value>,
}

impl NewTransaction {
    pub fn new(account_id: i64, kind: TransactionKind, amount: Amount, currency: &str, gateway: GatewayKind) -> Self {
        Self {
            account_id,
            kind,
            amount,
            currency: currency.to_string(),
            gateway,
            gateway_ref: GatewayRef::generate(gateway),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_gateway_ref(mut self, gateway_ref: GatewayRef) -> Self {
        self.gateway_ref = gateway_ref;
        self
    }
}

//--------------------------------------      PlanType       ---------------------------------------------------------
/// The subscription plan catalog. Durations are fixed per plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl PlanType {
    pub fn duration_days(&self) -> i64 {
        match self {
            Self::Weekly => 7,
            Self::Monthly => 30,
            Self::Quarterly => 90,
            Self::Yearly => 365,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::days(self.duration_days())
    }
}

impl Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(ConversionError::new("subscription plan", s)),
        }
    }
}

//--------------------------------------  SubscriptionStatus ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

//--------------------------------------    Subscription     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: String,
    pub plan_type: PlanType,
    pub duration_days: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: SubscriptionStatus,
    /// The transaction that created this subscription. Audit reference only.
    pub funding_transaction_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date >= now
    }
}

//--------------------------------------     LedgerAlert     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    GatewayMismatch,
    UnknownTransaction,
    SubscriptionActivationFailed,
    InsufficientFunds,
}

impl Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GatewayMismatch => "gateway_mismatch",
            Self::UnknownTransaction => "unknown_transaction",
            Self::SubscriptionActivationFailed => "subscription_activation_failed",
            Self::InsufficientFunds => "insufficient_funds",
        };
        f.write_str(s)
    }
}

/// An operator-facing record of a reconciliation anomaly.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LedgerAlert {
    pub id: i64,
    pub kind: AlertKind,
    pub gateway: Option<GatewayKind>,
    pub gateway_ref: GatewayRef,
    pub transaction_id: Option<i64>,
    pub detail: String,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLedgerAlert {
    pub kind: AlertKind,
    pub gateway: Option<GatewayKind>,
    pub gateway_ref: GatewayRef,
    pub transaction_id: Option<i64>,
    pub detail: String,
}

impl NewLedgerAlert {
    pub fn new(kind: AlertKind, gateway_ref: GatewayRef, detail: impl Into<String>) -> Self {
        Self { kind, gateway: None, gateway_ref, transaction_id: None, detail: detail.into() }
    }

    pub fn for_transaction(kind: AlertKind, tx: &Transaction, detail: impl Into<String>) -> Self {
        Self {
            kind,
            gateway: Some(tx.gateway),
            gateway_ref: tx.gateway_ref.clone(),
            transaction_id: Some(tx.id),
            detail: detail.into(),
        }
    }

    pub fn with_gateway(mut self, gateway: GatewayKind) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds_have_a_direction() {
        assert!(TransactionKind::Deposit.is_credit());
        assert!(TransactionKind::Refund.is_credit());
        assert!(TransactionKind::TransferIn.is_credit());
        assert!(!TransactionKind::TransferOut.is_credit());
        assert!(!TransactionKind::SubscriptionPurchase.is_credit());
        let amount = Amount::from_major(150);
        assert_eq!(TransactionKind::SubscriptionPurchase.balance_delta(amount), -amount);
    }

    #[test]
    fn parse_names() {
        assert_eq!("transfer-out".parse::<TransactionKind>().unwrap(), TransactionKind::TransferOut);
        assert_eq!("Subscription_Purchase".parse::<TransactionKind>().unwrap(), TransactionKind::SubscriptionPurchase);
        assert_eq!("wallet-a".parse::<GatewayKind>().unwrap(), GatewayKind::WalletA);
        assert!("paypal".parse::<GatewayKind>().is_err());
        assert_eq!("MONTHLY".parse::<PlanType>().unwrap().duration_days(), 30);
        assert!("15days".parse::<PlanType>().is_err());
    }

    #[test]
    fn generated_refs_are_unique() {
        let a = GatewayRef::generate(GatewayKind::Card);
        let b = GatewayRef::generate(GatewayKind::Card);
        assert!(a.as_str().starts_with("CRD-"));
        assert_ne!(a, b);
    }
}
