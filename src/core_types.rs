//! Core type definitions shared by every component.
//!
//! Identifiers are ULID-based so they can be generated without coordination
//! and sort by creation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// User identifier, supplied by the upstream identity service.
pub type UserId = i64;

/// Currencies priced as volatile crypto instruments.
pub const CRYPTO_CURRENCIES: &[&str] = &[
    "BTC", "ETH", "USDT", "USDC", "SOL", "BNB", "LTC", "TRX", "XRP", "DOGE",
];

/// Currency code, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "USD")]
pub struct Currency(String);

impl Currency {
    /// Parse and normalize a currency code (2-6 ASCII alphanumerics).
    pub fn new(code: &str) -> Result<Self, InvalidCurrency> {
        let code = code.trim();
        if code.len() < 2 || code.len() > 6 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_crypto(&self) -> bool {
        CRYPTO_CURRENCIES.contains(&self.0.as_str())
    }

    #[inline]
    pub fn is_fiat(&self) -> bool {
        !self.is_crypto()
    }

    /// Number of decimal places balances in this currency are kept at.
    #[inline]
    pub fn scale(&self) -> u32 {
        if self.is_crypto() { 8 } else { 2 }
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = InvalidCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Currency::new(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid currency code: {0}")]
pub struct InvalidCurrency(pub String);

/// Subscription tier of a user, modulating fee and spread discounts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Business,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "FREE",
            PlanTier::Pro => "PRO",
            PlanTier::Business => "BUSINESS",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FREE" => Ok(PlanTier::Free),
            "PRO" => Ok(PlanTier::Pro),
            "BUSINESS" => Ok(PlanTier::Business),
            other => Err(format!("Invalid plan tier: {}", other)),
        }
    }
}

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
        #[serde(transparent)]
        #[schema(value_type = String)]
        pub struct $name(ulid::Ulid);

        impl $name {
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(
    /// Wallet identifier
    WalletId
);

ulid_id!(
    /// Transaction identifier
    TransactionId
);

/// Generate an internal reference usable before the provider reference is known.
///
/// Format: `{PREFIX}-{ULID}`, e.g. `DEP-01HZX...`.
pub fn new_reference(prefix: &str) -> String {
    format!("{}-{}", prefix, ulid::Ulid::new())
}
