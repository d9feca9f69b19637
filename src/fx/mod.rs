//! FX Rate Service
//!
//! Resolves a price for any currency pair through a tiered chain:
//!
//! ```text
//! fresh cache ─▶ live source ─▶ stale cache ─▶ fallback table ─▶ identity (opt-in)
//! ```
//!
//! Crypto and tracked fiat pairs use a short cache lifetime, ordinary fiat
//! pairs a long one. Every live resolution writes both the forward and the
//! inverse cache entry.

pub mod cache;
pub mod fallback;
pub mod service;
pub mod sources;

pub use cache::{CachedRate, InMemoryRateCache, RateCache};
pub use service::{FxRateService, RateOrigin, RateQuote};
pub use sources::{CoinGeckoSource, CryptoPriceSource, ExchangeRateApiSource, FiatRateSource};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FxError {
    #[error("FX source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("FX source returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("No rate available for {from}/{to}")]
    RateUnavailable { from: String, to: String },

    #[error("No source configured for {0}")]
    NoSource(&'static str),
}

impl FxError {
    pub fn code(&self) -> &'static str {
        match self {
            FxError::SourceUnavailable(_) => "FX_SOURCE_UNAVAILABLE",
            FxError::InvalidResponse(_) => "FX_INVALID_RESPONSE",
            FxError::RateUnavailable { .. } => "FX_RATE_UNAVAILABLE",
            FxError::NoSource(_) => "FX_NO_SOURCE",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            FxError::RateUnavailable { .. } => 422,
            _ => 503,
        }
    }
}

impl From<reqwest::Error> for FxError {
    fn from(e: reqwest::Error) -> Self {
        FxError::SourceUnavailable(e.to_string())
    }
}
