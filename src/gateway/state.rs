use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::commission::{CommissionCalculator, CommissionStore, MemoryCommissionStore, PgCommissionStore};
use crate::config::{AppConfig, ProviderMode, ProvidersConfig};
use crate::db::Database;
use crate::funding::{DepositService, TransferService, WithdrawService};
use crate::fx::{CoinGeckoSource, ExchangeRateApiSource, FxRateService, InMemoryRateCache};
use crate::ledger::{Ledger, LedgerStore, MemoryLedgerStore, PgLedgerStore};
use crate::notify::BroadcastNotifier;
use crate::providers::{BankTransferGateway, CardGateway, CryptoGateway, GatewayRegistry};
use crate::swap::SwapEngine;
use crate::webhook::WebhookProcessor;

/// Gateway application state (shared)
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub deposits: DepositService,
    pub withdrawals: WithdrawService,
    pub transfers: TransferService,
    pub swaps: SwapEngine,
    pub webhooks: WebhookProcessor,
    pub fx: Arc<FxRateService>,
    pub commission: Arc<CommissionCalculator>,
    pub notifier: Arc<BroadcastNotifier>,
    /// PostgreSQL, when configured
    pub db: Option<Arc<Database>>,
    /// Required in `X-Admin-Token` for admin routes; admin is off when unset
    pub admin_token: Option<String>,
}

/// Parts that differ between production and tests.
pub struct StateParts {
    pub store: Arc<dyn LedgerStore>,
    pub commission_store: Arc<dyn CommissionStore>,
    pub gateways: GatewayRegistry,
    pub fx: FxRateService,
    pub clock: Arc<dyn Clock>,
    pub db: Option<Arc<Database>>,
}

impl AppState {
    /// Wire every service around the given stores and adapters.
    pub fn new(config: &AppConfig, parts: StateParts) -> Self {
        let notifier = Arc::new(BroadcastNotifier::default());
        let ledger = Arc::new(Ledger::new(
            parts.store,
            config.ledger.balance_strategy,
            notifier.clone(),
            parts.clock,
        ));
        let commission = Arc::new(CommissionCalculator::new(
            parts.commission_store,
            config.commission.clone(),
        ));
        let fx = Arc::new(parts.fx);

        Self {
            deposits: DepositService::new(ledger.clone(), parts.gateways.clone(), commission.clone(), fx.clone()),
            withdrawals: WithdrawService::new(ledger.clone(), parts.gateways.clone(), commission.clone()),
            transfers: TransferService::new(ledger.clone(), commission.clone()),
            swaps: SwapEngine::new(fx.clone(), commission.clone(), ledger.clone(), config.swap.quote_ttl_secs),
            webhooks: WebhookProcessor::new(parts.gateways, ledger.clone(), &config.providers),
            ledger,
            fx,
            commission,
            notifier,
            db: parts.db,
            admin_token: config.admin_token.clone(),
        }
    }

    /// Build production state: PostgreSQL when `postgres_url` is set,
    /// in-memory stores otherwise.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let (store, commission_store, db): (Arc<dyn LedgerStore>, Arc<dyn CommissionStore>, _) =
            match &config.postgres_url {
                Some(url) => {
                    let db = Database::connect(url).await.context("PostgreSQL connection failed")?;
                    db.migrate().await.context("Database migration failed")?;
                    let pool = db.pool().clone();
                    (
                        Arc::new(PgLedgerStore::new(pool.clone())),
                        Arc::new(PgCommissionStore::new(pool)),
                        Some(Arc::new(db)),
                    )
                }
                None => {
                    warn!("postgres_url not set, using in-memory stores; balances are lost on restart");
                    (
                        Arc::new(MemoryLedgerStore::new(clock.clone())),
                        Arc::new(MemoryCommissionStore::new()),
                        None,
                    )
                }
            };

        let fx = FxRateService::new(config.fx.clone(), Arc::new(InMemoryRateCache::new()), clock.clone())
            .with_crypto_source(Arc::new(CoinGeckoSource::new(
                config.fx.crypto_source_url.clone(),
                config.fx.request_timeout_secs,
            )?))
            .with_fiat_source(Arc::new(ExchangeRateApiSource::new(
                config.fx.fiat_source_url.clone(),
                config.fx.request_timeout_secs,
            )?));

        let gateways = build_gateways(&config.providers)?;
        info!(providers = ?gateways.names(), mode = ?config.providers.mode, "Payment providers registered");

        Ok(Self::new(
            config,
            StateParts {
                store,
                commission_store,
                gateways,
                fx,
                clock,
                db,
            },
        ))
    }
}

fn build_gateways(config: &ProvidersConfig) -> anyhow::Result<GatewayRegistry> {
    match config.mode {
        ProviderMode::Live => {
            let mut registry = GatewayRegistry::new();
            if let Some(card) = &config.card {
                registry = registry.register(Arc::new(CardGateway::new(card.clone())?));
            }
            if let Some(bank) = &config.bank {
                registry = registry.register(Arc::new(BankTransferGateway::new(bank.clone())?));
            }
            if let Some(crypto) = &config.crypto {
                registry = registry.register(Arc::new(CryptoGateway::new(crypto.clone())?));
            }
            if registry.names().is_empty() {
                anyhow::bail!("providers.mode is live but no provider is configured");
            }
            Ok(registry)
        }
        ProviderMode::Mock => mock_gateways(),
    }
}

#[cfg(feature = "mock-api")]
fn mock_gateways() -> anyhow::Result<GatewayRegistry> {
    use crate::providers::{MockGateway, PaymentMethod};
    use rust_decimal_macros::dec;

    warn!("Using mock payment providers; no real money moves");
    Ok(GatewayRegistry::new()
        .register(Arc::new(MockGateway::new("mockcard", PaymentMethod::Card, &["USD", "EUR", "GBP", "NGN"])))
        .register(Arc::new(MockGateway::new("mockbank", PaymentMethod::BankTransfer, &["USD", "EUR", "NGN"])))
        .register(Arc::new(
            MockGateway::new("mockchain", PaymentMethod::Crypto, &["BTC", "ETH", "USDT", "USDC"])
                .with_min_deposit(dec!(0.0001)),
        )))
}

#[cfg(not(feature = "mock-api"))]
fn mock_gateways() -> anyhow::Result<GatewayRegistry> {
    anyhow::bail!("providers.mode is mock but this build has the mock-api feature disabled")
}
