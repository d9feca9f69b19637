use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

use super::cache::{CachedRate, RateCache};
use super::fallback::fallback_rate;
use super::sources::{CryptoPriceSource, FiatRateSource};
use super::FxError;
use crate::clock::Clock;
use crate::config::FxConfig;
use crate::core_types::Currency;
use crate::money::round_rate;

/// Where a resolved rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RateOrigin {
    Identity,
    Cache,
    Live,
    StaleCache,
    Fallback,
    /// Unknown pair answered with 1.0
    LastResort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuote {
    pub rate: Decimal,
    pub origin: RateOrigin,
}

/// Tiered-cache, multi-source rate resolver.
pub struct FxRateService {
    config: FxConfig,
    cache: Arc<dyn RateCache>,
    clock: Arc<dyn Clock>,
    crypto: Option<Arc<dyn CryptoPriceSource>>,
    fiat: Option<Arc<dyn FiatRateSource>>,
    volatile_fiat: HashSet<Currency>,
    bridge: Currency,
}

impl FxRateService {
    pub fn new(config: FxConfig, cache: Arc<dyn RateCache>, clock: Arc<dyn Clock>) -> Self {
        let volatile_fiat = config
            .volatile_fiat
            .iter()
            .filter_map(|c| Currency::new(c).ok())
            .collect();
        let bridge = Currency::new(&config.bridge_currency).unwrap_or_else(|_| Currency::usd());
        Self {
            config,
            cache,
            clock,
            crypto: None,
            fiat: None,
            volatile_fiat,
            bridge,
        }
    }

    pub fn with_crypto_source(mut self, source: Arc<dyn CryptoPriceSource>) -> Self {
        self.crypto = Some(source);
        self
    }

    pub fn with_fiat_source(mut self, source: Arc<dyn FiatRateSource>) -> Self {
        self.fiat = Some(source);
        self
    }

    /// Crypto instruments and tracked fiat are volatile.
    pub fn is_volatile(&self, from: &Currency, to: &Currency) -> bool {
        from.is_crypto()
            || to.is_crypto()
            || self.volatile_fiat.contains(from)
            || self.volatile_fiat.contains(to)
    }

    pub fn ttl_for(&self, from: &Currency, to: &Currency) -> Duration {
        if self.is_volatile(from, to) {
            Duration::seconds(self.config.volatile_ttl_secs)
        } else {
            Duration::seconds(self.config.stable_ttl_secs)
        }
    }

    /// Units of `to` per unit of `from`.
    ///
    /// `apply_buffer` adds the configured safety margin; use it whenever the
    /// user is charged in a settlement currency different from the one they
    /// asked for.
    pub async fn get_rate(
        &self,
        from: &Currency,
        to: &Currency,
        apply_buffer: bool,
    ) -> Result<Decimal, FxError> {
        let quote = self.quote(from, to).await?;
        if apply_buffer && quote.origin != RateOrigin::Identity {
            Ok(round_rate(quote.rate * (Decimal::ONE + self.config.buffer)))
        } else {
            Ok(quote.rate)
        }
    }

    /// Resolve an unbuffered rate together with its provenance.
    pub async fn quote(&self, from: &Currency, to: &Currency) -> Result<RateQuote, FxError> {
        if from == to {
            return Ok(RateQuote {
                rate: Decimal::ONE,
                origin: RateOrigin::Identity,
            });
        }

        let now = self.clock.now();
        let cached = self.cache.get(from, to);

        if let Some(entry) = cached {
            if now - entry.fetched_at <= self.ttl_for(from, to) {
                return Ok(RateQuote {
                    rate: entry.rate,
                    origin: RateOrigin::Cache,
                });
            }
        }

        match self.fetch_live(from, to).await {
            Ok(rate) => {
                let rate = round_rate(rate);
                self.store(from, to, rate);
                debug!(%from, %to, %rate, "FX rate refreshed");
                return Ok(RateQuote {
                    rate,
                    origin: RateOrigin::Live,
                });
            }
            Err(e) => {
                warn!(%from, %to, error = %e, "Live FX sources failed");
            }
        }

        if let Some(entry) = cached {
            warn!(
                %from,
                %to,
                age_secs = (now - entry.fetched_at).num_seconds(),
                "Using stale FX cache entry"
            );
            return Ok(RateQuote {
                rate: entry.rate,
                origin: RateOrigin::StaleCache,
            });
        }

        if let Some(rate) = fallback_rate(from, to) {
            warn!(%from, %to, %rate, "Using hardcoded fallback FX rate");
            return Ok(RateQuote {
                rate,
                origin: RateOrigin::Fallback,
            });
        }

        if self.config.identity_fallback {
            error!(%from, %to, "No FX rate anywhere, answering 1.0");
            return Ok(RateQuote {
                rate: Decimal::ONE,
                origin: RateOrigin::LastResort,
            });
        }

        Err(FxError::RateUnavailable {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    async fn fetch_live(&self, from: &Currency, to: &Currency) -> Result<Decimal, FxError> {
        let rate = match (from.is_crypto(), to.is_crypto()) {
            (true, false) => self.crypto_source()?.price(from, to).await?,
            (false, true) => invert(self.crypto_source()?.price(to, from).await?)?,
            (true, true) => {
                let source = self.crypto_source()?;
                let from_bridge = source.price(from, &self.bridge).await?;
                let to_bridge = source.price(to, &self.bridge).await?;
                if to_bridge <= Decimal::ZERO {
                    return Err(FxError::InvalidResponse(format!("{} priced at zero", to)));
                }
                from_bridge / to_bridge
            }
            (false, false) => {
                self.fiat
                    .as_ref()
                    .ok_or(FxError::NoSource("fiat"))?
                    .rate(from, to)
                    .await?
            }
        };

        if rate <= Decimal::ZERO {
            return Err(FxError::InvalidResponse(format!(
                "non-positive rate {} for {}/{}",
                rate, from, to
            )));
        }
        Ok(rate)
    }

    fn crypto_source(&self) -> Result<&Arc<dyn CryptoPriceSource>, FxError> {
        self.crypto.as_ref().ok_or(FxError::NoSource("crypto"))
    }

    fn store(&self, from: &Currency, to: &Currency, rate: Decimal) {
        let fetched_at = self.clock.now();
        self.cache.put(from, to, CachedRate { rate, fetched_at });
        if let Ok(inverse) = invert(rate) {
            self.cache.put(
                to,
                from,
                CachedRate {
                    rate: round_rate(inverse),
                    fetched_at,
                },
            );
        }
    }
}

fn invert(rate: Decimal) -> Result<Decimal, FxError> {
    if rate <= Decimal::ZERO {
        return Err(FxError::InvalidResponse(format!("cannot invert {}", rate)));
    }
    Ok(Decimal::ONE / rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fx::cache::InMemoryRateCache;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn c(code: &str) -> Currency {
        Currency::new(code).unwrap()
    }

    /// Crypto feed priced in USD only, switchable offline.
    struct FakeCrypto {
        calls: AtomicUsize,
        down: AtomicBool,
    }

    impl FakeCrypto {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                down: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CryptoPriceSource for FakeCrypto {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn price(&self, crypto: &Currency, fiat: &Currency) -> Result<Decimal, FxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(FxError::SourceUnavailable("down".into()));
            }
            match (crypto.as_str(), fiat.as_str()) {
                ("BTC", "USD") => Ok(dec!(64000)),
                ("ETH", "USD") => Ok(dec!(3200)),
                _ => Err(FxError::InvalidResponse("unpriced".into())),
            }
        }
    }

    struct FakeFiat {
        rate: Decimal,
        down: AtomicBool,
    }

    #[async_trait]
    impl FiatRateSource for FakeFiat {
        fn name(&self) -> &'static str {
            "fake-fiat"
        }

        async fn rate(&self, _from: &Currency, _to: &Currency) -> Result<Decimal, FxError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(FxError::SourceUnavailable("down".into()));
            }
            Ok(self.rate)
        }
    }

    struct Harness {
        service: FxRateService,
        cache: Arc<InMemoryRateCache>,
        clock: Arc<ManualClock>,
        crypto: Arc<FakeCrypto>,
        fiat: Arc<FakeFiat>,
    }

    fn harness(config: FxConfig) -> Harness {
        let cache = Arc::new(InMemoryRateCache::new());
        let clock = Arc::new(ManualClock::default());
        let crypto = Arc::new(FakeCrypto::new());
        let fiat = Arc::new(FakeFiat {
            rate: dec!(1.10),
            down: AtomicBool::new(false),
        });
        let service = FxRateService::new(config, cache.clone(), clock.clone())
            .with_crypto_source(crypto.clone())
            .with_fiat_source(fiat.clone());
        Harness {
            service,
            cache,
            clock,
            crypto,
            fiat,
        }
    }

    #[tokio::test]
    async fn test_same_currency_is_identity() {
        let h = harness(FxConfig::default());
        let q = h.service.quote(&c("USD"), &c("USD")).await.unwrap();
        assert_eq!(q.rate, Decimal::ONE);
        assert_eq!(q.origin, RateOrigin::Identity);
        // buffer never applies to identity
        assert_eq!(h.service.get_rate(&c("USD"), &c("USD"), true).await.unwrap(), Decimal::ONE);
    }

    #[tokio::test]
    async fn test_crypto_to_fiat_populates_both_directions() {
        let h = harness(FxConfig::default());
        let q = h.service.quote(&c("BTC"), &c("USD")).await.unwrap();
        assert_eq!(q, RateQuote { rate: dec!(64000), origin: RateOrigin::Live });

        let inverse = h.cache.get(&c("USD"), &c("BTC")).unwrap();
        assert_eq!(inverse.rate, round_rate(dec!(1) / dec!(64000)));

        // inverse direction answered from cache, no extra source call
        let before = h.crypto.calls.load(Ordering::SeqCst);
        let q = h.service.quote(&c("USD"), &c("BTC")).await.unwrap();
        assert_eq!(q.origin, RateOrigin::Cache);
        assert_eq!(h.crypto.calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_fiat_to_crypto_inverts_price() {
        let h = harness(FxConfig::default());
        let q = h.service.quote(&c("USD"), &c("ETH")).await.unwrap();
        assert_eq!(q.rate, round_rate(dec!(1) / dec!(3200)));
        assert_eq!(q.origin, RateOrigin::Live);
    }

    #[tokio::test]
    async fn test_crypto_to_crypto_bridges_through_usd() {
        let h = harness(FxConfig::default());
        let q = h.service.quote(&c("BTC"), &c("ETH")).await.unwrap();
        assert_eq!(q.rate, dec!(20));
    }

    #[tokio::test]
    async fn test_volatile_ttl_expires_after_short_window() {
        let h = harness(FxConfig::default());
        h.service.quote(&c("BTC"), &c("USD")).await.unwrap();
        h.clock.advance(Duration::seconds(10));
        assert_eq!(
            h.service.quote(&c("BTC"), &c("USD")).await.unwrap().origin,
            RateOrigin::Cache
        );
        h.clock.advance(Duration::seconds(25));
        assert_eq!(
            h.service.quote(&c("BTC"), &c("USD")).await.unwrap().origin,
            RateOrigin::Live
        );
    }

    #[tokio::test]
    async fn test_stable_fiat_uses_long_ttl() {
        let h = harness(FxConfig::default());
        assert!(!h.service.is_volatile(&c("EUR"), &c("USD")));
        assert!(h.service.is_volatile(&c("NGN"), &c("USD")));

        h.service.quote(&c("EUR"), &c("USD")).await.unwrap();
        h.clock.advance(Duration::minutes(30));
        assert_eq!(
            h.service.quote(&c("EUR"), &c("USD")).await.unwrap().origin,
            RateOrigin::Cache
        );
    }

    #[tokio::test]
    async fn test_stale_cache_beats_fallback_when_sources_down() {
        let h = harness(FxConfig::default());
        h.service.quote(&c("BTC"), &c("USD")).await.unwrap();
        h.crypto.down.store(true, Ordering::SeqCst);
        h.clock.advance(Duration::hours(6));

        let q = h.service.quote(&c("BTC"), &c("USD")).await.unwrap();
        assert_eq!(q, RateQuote { rate: dec!(64000), origin: RateOrigin::StaleCache });
    }

    #[tokio::test]
    async fn test_fallback_table_when_no_source_and_no_cache() {
        let h = harness(FxConfig::default());
        h.fiat.down.store(true, Ordering::SeqCst);
        let q = h.service.quote(&c("EUR"), &c("USD")).await.unwrap();
        assert_eq!(q, RateQuote { rate: dec!(1.08), origin: RateOrigin::Fallback });
    }

    #[tokio::test]
    async fn test_unknown_pair_fails_closed_by_default() {
        let h = harness(FxConfig::default());
        h.fiat.down.store(true, Ordering::SeqCst);
        let err = h.service.quote(&c("XAF"), &c("JPY")).await.unwrap_err();
        assert!(matches!(err, FxError::RateUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_identity_last_resort_when_enabled() {
        let h = harness(FxConfig {
            identity_fallback: true,
            ..FxConfig::default()
        });
        h.fiat.down.store(true, Ordering::SeqCst);
        let q = h.service.quote(&c("XAF"), &c("JPY")).await.unwrap();
        assert_eq!(q, RateQuote { rate: Decimal::ONE, origin: RateOrigin::LastResort });
    }

    #[tokio::test]
    async fn test_buffer_applied_on_request() {
        let h = harness(FxConfig::default());
        let plain = h.service.get_rate(&c("EUR"), &c("USD"), false).await.unwrap();
        let buffered = h.service.get_rate(&c("EUR"), &c("USD"), true).await.unwrap();
        assert_eq!(plain, dec!(1.10));
        assert_eq!(buffered, dec!(1.133));
    }
}
