use std::{env, time::Duration};

use ledger_common::{parse_env_var, Secret};
use log::*;
use url::Url;

use crate::{db_types::GatewayKind, gateway::GatewayError};

const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CALLBACK_BASE_URL: &str = "http://localhost:8080/";
const DEFAULT_CARD_API_URL: &str = "https://sandbox.card-gateway.local/";
const DEFAULT_WALLET_A_API_URL: &str = "http://localhost:9101/";
const DEFAULT_WALLET_B_API_URL: &str = "http://localhost:9102/";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upper bound on every outbound gateway call.
    pub timeout: Duration,
    /// The public base URL that gateways redirect the user to, and post notifications to.
    pub callback_base_url: String,
    pub card: CardGatewayConfig,
    pub wallet_a: WalletGatewayConfig,
    pub wallet_b: WalletGatewayConfig,
}

#[derive(Debug, Clone)]
pub struct CardGatewayConfig {
    pub api_url: String,
    pub store_id: String,
    pub store_password: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct WalletGatewayConfig {
    pub api_url: String,
    /// Shared HMAC key. Signs our requests and verifies their callbacks.
    pub secret: Secret<String>,
}

/// Where the gateway sends the user's browser, and its server-to-server notification, once a payment completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
    pub success: Url,
    pub fail: Url,
    pub cancel: Url,
    pub ipn: Url,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_GATEWAY_TIMEOUT,
            callback_base_url: DEFAULT_CALLBACK_BASE_URL.to_string(),
            card: CardGatewayConfig {
                api_url: DEFAULT_CARD_API_URL.to_string(),
                store_id: String::default(),
                store_password: Secret::default(),
            },
            wallet_a: WalletGatewayConfig { api_url: DEFAULT_WALLET_A_API_URL.to_string(), secret: Secret::default() },
            wallet_b: WalletGatewayConfig { api_url: DEFAULT_WALLET_B_API_URL.to_string(), secret: Secret::default() },
        }
    }
}

impl GatewayConfig {
    pub fn from_env_or_default() -> Self {
        let timeout = match parse_env_var::<u64>("LEDGER_GATEWAY_TIMEOUT_SECS") {
            Some(Ok(secs)) => Duration::from_secs(secs),
            Some(Err(e)) => {
                error!(
                    "🪛️ LEDGER_GATEWAY_TIMEOUT_SECS is not a valid number of seconds. {e}. Using the default, \
                     {DEFAULT_GATEWAY_TIMEOUT:?}."
                );
                DEFAULT_GATEWAY_TIMEOUT
            },
            None => DEFAULT_GATEWAY_TIMEOUT,
        };
        let callback_base_url = url_from_env("LEDGER_CALLBACK_BASE_URL", DEFAULT_CALLBACK_BASE_URL);
        let card = CardGatewayConfig {
            api_url: url_from_env("LEDGER_CARD_API_URL", DEFAULT_CARD_API_URL),
            store_id: env::var("LEDGER_CARD_STORE_ID").unwrap_or_else(|_| {
                warn!("🪛️ LEDGER_CARD_STORE_ID is not set. Card payments will be rejected by the gateway.");
                String::default()
            }),
            store_password: secret_from_env("LEDGER_CARD_STORE_PASSWORD"),
        };
        let wallet_a = WalletGatewayConfig {
            api_url: url_from_env("LEDGER_WALLET_A_API_URL", DEFAULT_WALLET_A_API_URL),
            secret: secret_from_env("LEDGER_WALLET_A_SECRET"),
        };
        let wallet_b = WalletGatewayConfig {
            api_url: url_from_env("LEDGER_WALLET_B_API_URL", DEFAULT_WALLET_B_API_URL),
            secret: secret_from_env("LEDGER_WALLET_B_SECRET"),
        };
        Self { timeout, callback_base_url, card, wallet_a, wallet_b }
    }

    /// Builds the redirect and notification URLs for a gateway. They all land on the `payment/callback` endpoint; the
    /// final path segment tells the redirects apart.
    pub fn callback_urls(&self, gateway: GatewayKind) -> Result<CallbackUrls, GatewayError> {
        let join = |leaf: &str| endpoint(&self.callback_base_url, &format!("payment/callback/{gateway}/{leaf}"));
        Ok(CallbackUrls { success: join("success")?, fail: join("fail")?, cancel: join("cancel")?, ipn: join("ipn")? })
    }
}

fn url_from_env(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(s) if Url::parse(&s).is_ok() => s,
        Ok(s) => {
            error!("🪛️ {key} ({s}) is not a valid URL. Using the default, {default}.");
            default.to_string()
        },
        Err(_) => {
            warn!("🪛️ {key} is not set. Using the default, {default}.");
            default.to_string()
        },
    }
}

/// Resolves `path` against a configured base URL.
pub(crate) fn endpoint(base: &str, path: &str) -> Result<Url, GatewayError> {
    Url::parse(base)
        .and_then(|base| base.join(path))
        .map_err(|e| GatewayError::Configuration(format!("Invalid gateway URL {base} + {path}: {e}")))
}

fn secret_from_env(key: &str) -> Secret<String> {
    let value = env::var(key).unwrap_or_else(|_| {
        warn!("🪛️ {key} is not set. Requests and callbacks for this gateway cannot be authenticated.");
        String::default()
    });
    Secret::new(value)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn callback_urls_are_per_gateway() {
        let config =
            GatewayConfig { callback_base_url: "https://ledger.example.com/api/".into(), ..Default::default() };
        let urls = config.callback_urls(GatewayKind::WalletA).unwrap();
        assert_eq!(urls.success.as_str(), "https://ledger.example.com/api/payment/callback/wallet_a/success");
        assert_eq!(urls.ipn.as_str(), "https://ledger.example.com/api/payment/callback/wallet_a/ipn");
        let urls = GatewayConfig::default().callback_urls(GatewayKind::Card).unwrap();
        assert_eq!(urls.cancel.as_str(), "http://localhost:8080/payment/callback/card/cancel");
    }
}
