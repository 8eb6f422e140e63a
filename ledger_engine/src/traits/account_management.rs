use crate::{
    db_types::{Account, GatewayRef, LedgerAlert, Transaction},
    traits::{data_objects::LedgerTotals, LedgerDbError},
};

/// Read-only queries over accounts, their transactions and the operator alert log.
#[allow(async_fn_in_trait)]
pub trait AccountManagement {
    /// Fetches the account with the given internal id. If no account exists, `None` is returned.
    async fn fetch_account(&self, account_id: i64) -> Result<Option<Account>, LedgerDbError>;

    async fn fetch_account_for_user(&self, user_id: &str) -> Result<Option<Account>, LedgerDbError>;

    async fn fetch_transaction(&self, id: i64) -> Result<Option<Transaction>, LedgerDbError>;

    async fn fetch_transaction_by_gateway_ref(
        &self,
        gateway_ref: &GatewayRef,
    ) -> Result<Option<Transaction>, LedgerDbError>;

    /// All transactions for the account, newest first.
    async fn fetch_transactions_for_account(&self, account_id: i64) -> Result<Vec<Transaction>, LedgerDbError>;

    /// Sums of settled credits and settled debits for the account.
    async fn settled_totals(&self, account_id: i64) -> Result<LedgerTotals, LedgerDbError>;

    async fn fetch_alerts(&self, include_acknowledged: bool) -> Result<Vec<LedgerAlert>, LedgerDbError>;
}
