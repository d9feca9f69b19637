use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

use crate::core_types::PlanTier;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Security and reconciliation events are copied here for on-call
    #[serde(default = "default_alert_log_file")]
    pub alert_log_file: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL. Without it the in-memory store is used.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub fx: FxConfig,
    #[serde(default)]
    pub commission: CommissionConfig,
    #[serde(default)]
    pub swap: SwapConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Shared secret expected in `X-Admin-Token` for admin endpoints
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_alert_log_file() -> String {
    "alerts.log".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// How a settlement credit reaches the wallet balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    /// Status flip and balance increment in one store-side operation.
    #[default]
    Atomic,
    /// Read balance, compute, write balance, then write status.
    /// Only safe against replays; distinct concurrent credits to the same
    /// wallet can lose an update.
    ReadModifyWrite,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub balance_strategy: BalanceStrategy,
    /// Unresolved deposits older than this are failed by the expiry worker
    pub deposit_expiry_hours: i64,
    pub expiry_scan_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            balance_strategy: BalanceStrategy::Atomic,
            deposit_expiry_hours: 24,
            expiry_scan_secs: 300,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FxConfig {
    /// Cache lifetime for crypto and tracked fiat pairs
    pub volatile_ttl_secs: i64,
    /// Cache lifetime for ordinary fiat pairs
    pub stable_ttl_secs: i64,
    /// Safety margin applied when charging in a different settlement currency
    pub buffer: Decimal,
    /// Fiat currencies priced with the volatile TTL
    pub volatile_fiat: Vec<String>,
    /// Fiat currency used to bridge crypto-to-crypto pairs
    pub bridge_currency: String,
    pub crypto_source_url: String,
    pub fiat_source_url: String,
    pub request_timeout_secs: u64,
    /// Return 1.0 for pairs missing from every source and the fallback table.
    /// When false such pairs fail closed.
    pub identity_fallback: bool,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            volatile_ttl_secs: 30,
            stable_ttl_secs: 3600,
            buffer: dec!(0.03),
            volatile_fiat: vec!["NGN".into(), "GHS".into(), "KES".into()],
            bridge_currency: "USD".to_string(),
            crypto_source_url: "https://api.coingecko.com/api/v3".to_string(),
            fiat_source_url: "https://open.er-api.com/v6".to_string(),
            request_timeout_secs: 5,
            identity_fallback: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommissionConfig {
    /// Platform default percentage per transaction type, used when no setting exists
    pub default_rates: HashMap<String, Decimal>,
    pub default_rate: Decimal,
    /// Swap / crypto purchase spread
    pub spread: Decimal,
    pub plan_multipliers: PlanMultipliers,
    /// Settings are re-read from the store after this many seconds
    pub settings_ttl_secs: u64,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        let mut default_rates = HashMap::new();
        default_rates.insert("DEPOSIT".to_string(), dec!(0.07));
        default_rates.insert("WITHDRAWAL".to_string(), dec!(0.01));
        default_rates.insert("SWAP".to_string(), dec!(0.005));
        default_rates.insert("TRANSFER".to_string(), Decimal::ZERO);
        Self {
            default_rates,
            default_rate: dec!(0.01),
            spread: dec!(0.02),
            plan_multipliers: PlanMultipliers::default(),
            settings_ttl_secs: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlanMultipliers {
    pub free: Decimal,
    pub pro: Decimal,
    pub business: Decimal,
}

impl PlanMultipliers {
    pub fn for_plan(&self, plan: PlanTier) -> Decimal {
        match plan {
            PlanTier::Free => self.free,
            PlanTier::Pro => self.pro,
            PlanTier::Business => self.business,
        }
    }
}

impl Default for PlanMultipliers {
    fn default() -> Self {
        Self {
            free: Decimal::ONE,
            pro: dec!(0.8),
            business: dec!(0.5),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SwapConfig {
    pub quote_ttl_secs: i64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self { quote_ttl_secs: 30 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    Live,
    #[default]
    Mock,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProvidersConfig {
    pub mode: ProviderMode,
    /// References with this prefix skip provider re-verification
    pub test_reference_prefix: String,
    /// Re-query the provider before settling a webhook event
    pub reverify_webhooks: bool,
    #[serde(default)]
    pub card: Option<ProviderConfig>,
    #[serde(default)]
    pub bank: Option<ProviderConfig>,
    #[serde(default)]
    pub crypto: Option<ProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Mock,
            test_reference_prefix: "TEST-".to_string(),
            reverify_webhooks: true,
            card: None,
            bank: None,
            crypto: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Provider key, also the `{provider}` path segment of its webhook route
    pub name: String,
    pub base_url: String,
    pub secret_key: String,
    pub webhook_secret: String,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// Currencies the provider can charge in. The first is the default settlement currency.
    pub settlement_currencies: Vec<String>,
    /// Where the provider sends the user back after checkout
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub bank_details: Option<BankDetailsConfig>,
    /// Minimum accepted deposit per crypto currency
    #[serde(default)]
    pub min_deposits: HashMap<String, Decimal>,
}

fn default_signature_header() -> String {
    "x-signature".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BankDetailsConfig {
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
    #[serde(default)]
    pub routing_number: Option<String>,
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", config_path, e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config yaml: {}", e))
    }
}
