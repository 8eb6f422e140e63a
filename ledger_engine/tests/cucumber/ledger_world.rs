use std::{collections::HashMap, time::Duration};

use cucumber::World;
use ledger_engine::{
    db_types::Transaction,
    events::EventProducers,
    gateway::GatewayAdapter,
    test_utils::{
        prepare_env::{create_database, random_db_path, run_migrations},
        simulated_gateway::SimulatedGateway,
    },
    LedgerError,
    ReconciliationApi,
    SqliteDatabase,
};
use log::*;

#[derive(Default, Debug, World)]
pub struct LedgerWorld {
    pub system: Option<LedgerSystem>,
}

#[derive(Debug)]
pub struct LedgerSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub api: ReconciliationApi<SqliteDatabase, SimulatedGateway>,
    /// Transactions started by the scenario, by the label the scenario gave them.
    pub transactions: HashMap<String, Transaction>,
    pub last_error: Option<LedgerError>,
}

impl LedgerWorld {
    pub fn system(&mut self) -> &mut LedgerSystem {
        self.system.as_mut().expect("Ledger not initialised")
    }

    pub fn api(&self) -> &ReconciliationApi<SqliteDatabase, SimulatedGateway> {
        &self.system.as_ref().expect("Ledger not initialised").api
    }

    pub fn transaction(&self, label: &str) -> Transaction {
        let system = self.system.as_ref().expect("Ledger not initialised");
        system.transactions.get(label).cloned().unwrap_or_else(|| panic!("No transaction labelled {label}"))
    }

    pub fn record_result<T>(&mut self, result: Result<T, LedgerError>) -> Option<T> {
        match result {
            Ok(v) => {
                self.system().last_error = None;
                Some(v)
            },
            Err(e) => {
                debug!("🥒️ Call failed: {e}");
                self.system().last_error = Some(e);
                None
            },
        }
    }
}

impl LedgerSystem {
    pub async fn new() -> Self {
        let url = random_db_path();
        create_database(&url).await;
        run_migrations(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating connection to database");
        debug!("🥒️ Created database: {url}");
        let gateway = GatewayAdapter::new(SimulatedGateway::new(), Duration::from_millis(250));
        let api = ReconciliationApi::new(db.clone(), gateway, EventProducers::default());
        Self { db_path: url, db, api, transactions: HashMap::new(), last_error: None }
    }
}
