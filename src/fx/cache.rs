//! Exchange-rate cache.
//!
//! The cache is owned by the [`FxRateService`](super::FxRateService) instance
//! it is injected into. Entries carry their fetch time; freshness is decided
//! by the service, never by the cache, so a stale entry stays available as a
//! degraded fallback.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::core_types::Currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedRate {
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
}

pub trait RateCache: Send + Sync {
    fn get(&self, from: &Currency, to: &Currency) -> Option<CachedRate>;
    fn put(&self, from: &Currency, to: &Currency, entry: CachedRate);
    fn clear(&self);
}

/// Concurrent in-memory cache keyed by (from, to).
#[derive(Debug, Default)]
pub struct InMemoryRateCache {
    entries: DashMap<(Currency, Currency), CachedRate>,
}

impl InMemoryRateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RateCache for InMemoryRateCache {
    fn get(&self, from: &Currency, to: &Currency) -> Option<CachedRate> {
        self.entries
            .get(&(from.clone(), to.clone()))
            .map(|e| *e.value())
    }

    fn put(&self, from: &Currency, to: &Currency, entry: CachedRate) {
        self.entries.insert((from.clone(), to.clone()), entry);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_put_get_overwrite() {
        let cache = InMemoryRateCache::new();
        let eur = Currency::new("EUR").unwrap();
        let usd = Currency::new("USD").unwrap();
        let t0 = Utc::now();

        assert!(cache.get(&eur, &usd).is_none());
        cache.put(&eur, &usd, CachedRate { rate: dec!(1.08), fetched_at: t0 });
        assert_eq!(cache.get(&eur, &usd).unwrap().rate, dec!(1.08));
        // direction matters
        assert!(cache.get(&usd, &eur).is_none());

        cache.put(&eur, &usd, CachedRate { rate: dec!(1.09), fetched_at: t0 });
        assert_eq!(cache.get(&eur, &usd).unwrap().rate, dec!(1.09));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
