//! Quote locks: a priced swap reserved between preview and execute.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::clock::Clock;
use crate::core_types::{Currency, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SwapQuote {
    pub lock_id: String,
    #[serde(skip)]
    pub user_id: UserId,
    pub from_currency: Currency,
    pub to_currency: Currency,
    #[schema(value_type = String)]
    pub amount_in: Decimal,
    /// In `from_currency`
    #[schema(value_type = String)]
    pub fee: Decimal,
    /// Effective rate, spread included
    #[schema(value_type = String)]
    pub rate: Decimal,
    #[schema(value_type = String)]
    pub market_rate: Decimal,
    #[schema(value_type = String)]
    pub amount_out: Decimal,
    /// Spread income in `to_currency`
    #[serde(skip)]
    pub spread_revenue: Decimal,
    pub expires_at: DateTime<Utc>,
}

impl SwapQuote {
    pub fn matches(&self, user_id: UserId, from: &Currency, to: &Currency, amount: Decimal) -> bool {
        self.user_id == user_id && &self.from_currency == from && &self.to_currency == to && self.amount_in == amount
    }
}

/// What [`QuoteBook::take`] found for a lock id.
#[derive(Debug, Clone, PartialEq)]
pub enum LockLookup {
    Valid(SwapQuote),
    Expired,
    Unknown,
}

pub struct QuoteBook {
    quotes: DashMap<String, SwapQuote>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl QuoteBook {
    pub fn new(ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            quotes: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
            clock,
        }
    }

    pub fn expiry_from_now(&self) -> DateTime<Utc> {
        self.clock.now() + self.ttl
    }

    pub fn insert(&self, quote: SwapQuote) {
        self.purge_expired();
        self.quotes.insert(quote.lock_id.clone(), quote);
    }

    /// Remove and return a lock. A lock is usable once.
    pub fn take(&self, lock_id: &str) -> LockLookup {
        match self.quotes.remove(lock_id) {
            Some((_, quote)) if quote.expires_at > self.clock.now() => LockLookup::Valid(quote),
            Some(_) => LockLookup::Expired,
            None => LockLookup::Unknown,
        }
    }

    /// Put back a lock taken by a request that did not use it.
    pub fn restore(&self, quote: SwapQuote) {
        self.quotes.insert(quote.lock_id.clone(), quote);
    }

    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.quotes.retain(|_, q| q.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}
