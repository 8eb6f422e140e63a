use std::{env, time::Duration};

use chrono::Duration as ChronoDuration;
use ledger_common::{parse_boolean_flag, parse_env_var, DEFAULT_CURRENCY_CODE};
use ledger_engine::gateway::GatewayConfig;
use log::*;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/ledger.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_RECONCILE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_RECONCILE_MIN_AGE_MINS: i64 = 15;

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// The currency recorded on new transactions.
    pub currency: String,
    /// How often the subscription expiry sweep runs.
    pub expiry_interval: Duration,
    /// How often pending external transactions are re-queried at their gateway.
    pub reconcile_interval: Duration,
    /// Pending transactions younger than this are left alone by the reconciliation sweep.
    pub reconcile_min_age: ChronoDuration,
    /// Apply pending migrations before the workers start.
    pub auto_migrate: bool,
    pub gateways: GatewayConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            currency: DEFAULT_CURRENCY_CODE.to_string(),
            expiry_interval: DEFAULT_EXPIRY_SWEEP_INTERVAL,
            reconcile_interval: DEFAULT_RECONCILE_SWEEP_INTERVAL,
            reconcile_min_age: ChronoDuration::minutes(DEFAULT_RECONCILE_MIN_AGE_MINS),
            auto_migrate: true,
            gateways: GatewayConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env_or_default() -> Self {
        let database_url = env::var("LEDGER_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ LEDGER_DATABASE_URL is not set. Using {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let max_connections = env_or("LEDGER_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS);
        let currency = env::var("LEDGER_CURRENCY")
            .map(|s| s.trim().to_ascii_uppercase())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY_CODE.to_string());
        let expiry_interval = seconds_from_env("LEDGER_EXPIRY_SWEEP_INTERVAL_SECS", DEFAULT_EXPIRY_SWEEP_INTERVAL);
        let reconcile_interval =
            seconds_from_env("LEDGER_RECONCILE_SWEEP_INTERVAL_SECS", DEFAULT_RECONCILE_SWEEP_INTERVAL);
        let min_age = env_or("LEDGER_RECONCILE_MIN_AGE_MINS", DEFAULT_RECONCILE_MIN_AGE_MINS);
        let auto_migrate = parse_boolean_flag(env::var("LEDGER_AUTO_MIGRATE").ok(), true);
        let gateways = GatewayConfig::from_env_or_default();
        Self {
            database_url,
            max_connections,
            currency,
            expiry_interval,
            reconcile_interval,
            reconcile_min_age: ChronoDuration::minutes(min_age),
            auto_migrate,
            gateways,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match parse_env_var::<T>(key) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            error!("🪛️ {key} is not valid. {e} Using the default, {default}, instead.");
            default
        },
        None => {
            debug!("🪛️ {key} is not set. Using the default, {default}.");
            default
        },
    }
}

fn seconds_from_env(key: &str, default: Duration) -> Duration {
    match env_or(key, default.as_secs()) {
        0 => {
            warn!("🪛️ {key} cannot be zero. Using {}s.", default.as_secs());
            default
        },
        secs => Duration::from_secs(secs),
    }
}
