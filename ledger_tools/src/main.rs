use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use ledger_common::Amount;
use ledger_engine::{
    db_types::{Account, TransactionKind},
    events::EventProducers,
    gateway::{GatewayAdapter, HttpGateways},
    AccountManagement,
    LedgerDatabase,
    ReconciliationApi,
    SqliteDatabase,
    SubscriptionApi,
    TransactionEngine,
};
use log::*;

use crate::{
    config::LedgerConfig,
    workers::{start_expiry_worker, start_reconcile_worker},
};

mod config;
mod formatting;
mod workers;

#[derive(Parser, Debug)]
#[command(version, about = "Operator tools for the payment and balance ledger")]
pub struct Arguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply any pending database migrations
    #[clap(name = "migrate")]
    Migrate,
    /// Expire every active subscription whose end date has passed
    #[clap(name = "expire")]
    Expire,
    /// Re-query the gateways for transactions that have been pending for too long
    #[clap(name = "reconcile")]
    Reconcile {
        /// Only sweep transactions pending for at least this many minutes. Defaults to LEDGER_RECONCILE_MIN_AGE_MINS
        #[arg(short = 'm', long = "min-age")]
        min_age_mins: Option<i64>,
    },
    /// Run the expiry and reconciliation workers until interrupted
    #[clap(name = "watch")]
    Watch,
    /// Show a user's balance and transaction history
    #[clap(name = "balance")]
    Balance { user_id: String },
    /// Recompute a user's balance from settled transactions and compare it with the stored balance
    #[clap(name = "audit")]
    Audit { user_id: String },
    /// Show a user's premium status
    #[clap(name = "subscription")]
    Subscription { user_id: String },
    /// List operator alerts
    #[clap(name = "alerts")]
    Alerts {
        /// Include alerts that have been acknowledged
        #[arg(short, long)]
        all: bool,
        /// Acknowledge the alert with this id
        #[arg(long = "ack")]
        acknowledge: Option<i64>,
    },
    /// Retry the subscription activation for a settled subscription purchase
    #[clap(name = "retry-activation")]
    RetryActivation { transaction_id: i64 },
    /// Apply a balance adjustment, e.g. `adjust alice deposit 150.00`
    #[clap(name = "adjust")]
    Adjust {
        user_id: String,
        kind: TransactionKind,
        amount: Amount,
        /// Free-text reason, stored with the transaction
        #[arg(short, long, default_value = "operator adjustment")]
        memo: String,
    },
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    let cli = Arguments::parse();
    let config = LedgerConfig::from_env_or_default();
    if let Err(e) = run(cli.command, config).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: LedgerConfig) -> Result<()> {
    let db = SqliteDatabase::new_with_url(&config.database_url, config.max_connections).await?;
    let engine = TransactionEngine::new(db.clone(), EventProducers::default()).with_currency(&config.currency);
    match command {
        Command::Migrate => {
            db.migrate().await?;
            println!("Migrations complete");
        },
        Command::Expire => {
            let expired = SubscriptionApi::new(db.clone(), EventProducers::default()).expire().await?;
            println!("{} subscriptions expired", expired.len());
        },
        Command::Reconcile { min_age_mins } => {
            let api = reconciliation_api(db.clone(), &config)?;
            let min_age = min_age_mins.map(chrono::Duration::minutes).unwrap_or(config.reconcile_min_age);
            let report = api.sweep_pending(min_age).await?;
            println!("{}", formatting::format_sweep(&report));
        },
        Command::Watch => watch(db.clone(), &config).await?,
        Command::Balance { user_id } => {
            let account = user_account(&engine, &user_id).await?;
            let history = engine.history(account.id).await?;
            print!("{}", formatting::format_account(&account, &history)?);
        },
        Command::Audit { user_id } => {
            let account = user_account(&engine, &user_id).await?;
            let report = engine.audit_account(account.id).await?;
            print!("{}", formatting::format_audit(&report)?);
            if !report.is_consistent() {
                return Err(anyhow!("Account #{} failed the audit", account.id));
            }
        },
        Command::Subscription { user_id } => {
            let status = SubscriptionApi::new(db.clone(), EventProducers::default()).status(&user_id).await?;
            print!("{}", formatting::format_subscription_status(&status)?);
        },
        Command::Alerts { all, acknowledge } => {
            if let Some(id) = acknowledge {
                match db.acknowledge_alert(id).await? {
                    Some(alert) => println!("Alert #{} ({}) acknowledged", alert.id, alert.kind),
                    None => return Err(anyhow!("There is no alert #{id}")),
                }
            }
            let alerts = db.fetch_alerts(all).await?;
            print!("{}", formatting::format_alerts(&alerts));
        },
        Command::RetryActivation { transaction_id } => {
            let api = reconciliation_api(db.clone(), &config)?;
            let result = api.retry_activation(transaction_id).await?;
            let sub = &result.subscription;
            println!("Subscription #{} for {} is active until {}", sub.id, sub.user_id, sub.end_date);
        },
        Command::Adjust { user_id, kind, amount, memo } => {
            let account = engine.open_account(&user_id).await?;
            let tx = engine.adjust_balance(account.id, kind, amount, &memo).await?;
            let account = engine.account(account.id).await?;
            println!("Transaction #{} ({kind} of {amount}) settled. Balance is now {}", tx.id, account.balance);
        },
    }
    let mut db = db;
    db.close().await?;
    Ok(())
}

fn reconciliation_api(
    db: SqliteDatabase,
    config: &LedgerConfig,
) -> Result<ReconciliationApi<SqliteDatabase, HttpGateways>> {
    let gateways = HttpGateways::new(config.gateways.clone())?;
    let adapter = GatewayAdapter::new(gateways, config.gateways.timeout);
    Ok(ReconciliationApi::new(db, adapter, EventProducers::default()))
}

async fn user_account(engine: &TransactionEngine<SqliteDatabase>, user_id: &str) -> Result<Account> {
    engine.account_for_user(user_id).await?.ok_or_else(|| anyhow!("{user_id} does not have an account"))
}

async fn watch(db: SqliteDatabase, config: &LedgerConfig) -> Result<()> {
    if config.auto_migrate {
        db.migrate().await?;
    }
    let subscriptions = SubscriptionApi::new(db.clone(), EventProducers::default());
    let reconciler = reconciliation_api(db, config)?;
    let expiry = start_expiry_worker(subscriptions, config.expiry_interval);
    let sweeper = start_reconcile_worker(reconciler, config.reconcile_interval, config.reconcile_min_age);
    info!("🕰️ Workers running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("🕰️ Shutting down workers");
    expiry.abort();
    sweeper.abort();
    Ok(())
}
