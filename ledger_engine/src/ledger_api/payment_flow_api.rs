use std::fmt::Debug;

use ledger_common::Amount;
use log::*;
use serde_json::Value;

use crate::{
    db_types::{GatewayKind, TransactionKind},
    gateway::{GatewayAdapter, PaymentGateway, PaymentRequest},
    ledger_api::{ledger_objects::PaymentInitiation, LedgerError, TransactionEngine},
    traits::LedgerDatabase,
};

/// Starts payments that are completed outside the ledger.
///
/// The pending transaction is always recorded *before* the gateway is contacted, so that a callback can never arrive
/// for a reference the ledger does not know about.
pub struct PaymentFlowApi<B, G> {
    engine: TransactionEngine<B>,
    gateway: GatewayAdapter<G>,
}

impl<B: Debug, G> Debug for PaymentFlowApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentFlowApi ({:?})", self.engine)
    }
}

impl<B, G> PaymentFlowApi<B, G>
where
    B: LedgerDatabase,
    G: PaymentGateway,
{
    pub fn new(engine: TransactionEngine<B>, gateway: GatewayAdapter<G>) -> Self {
        Self { engine, gateway }
    }

    pub fn engine(&self) -> &TransactionEngine<B> {
        &self.engine
    }

    /// Records a pending transaction and opens a payment session for it at `gateway`.
    ///
    /// If the gateway fails or does not answer in time, the transaction is left pending. A later callback or the
    /// pending sweep resolves it. The returned error carries the transaction id.
    pub async fn initiate_payment(
        &self,
        account_id: i64,
        kind: TransactionKind,
        amount: Amount,
        metadata: Option<Value>,
        gateway: GatewayKind,
    ) -> Result<PaymentInitiation, LedgerError> {
        if !gateway.is_external() {
            return Err(LedgerError::InvalidRequest(format!("{gateway} is not a payment gateway")));
        }
        let transaction = self.engine.initiate_with_gateway(account_id, kind, amount, metadata, gateway).await?;
        let request = PaymentRequest::from(&transaction);
        match self.gateway.initiate_payment(&request).await {
            Ok(session) => {
                info!("💸 Payment session for transaction #{} opened at {gateway}", transaction.id);
                Ok(PaymentInitiation { transaction, session })
            },
            Err(e) => {
                warn!("💸 Could not open a {gateway} session for transaction #{}: {e}. It stays pending.", transaction.id);
                Err(LedgerError::from_gateway(e, Some(transaction.id)))
            },
        }
    }
}
