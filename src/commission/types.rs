use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::core_types::Currency;

/// Operation a commission setting applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionType {
    Deposit,
    Withdrawal,
    Swap,
    Transfer,
}

impl CommissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionType::Deposit => "DEPOSIT",
            CommissionType::Withdrawal => "WITHDRAWAL",
            CommissionType::Swap => "SWAP",
            CommissionType::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for CommissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommissionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(CommissionType::Deposit),
            "WITHDRAWAL" => Ok(CommissionType::Withdrawal),
            "SWAP" => Ok(CommissionType::Swap),
            "TRANSFER" => Ok(CommissionType::Transfer),
            other => Err(format!("Unknown commission type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionKind {
    /// `value` is a fraction of the amount (0.07 = 7%)
    Percentage,
    /// `value` is a flat fee in the transaction currency
    Fixed,
}

impl CommissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionKind::Percentage => "PERCENTAGE",
            CommissionKind::Fixed => "FIXED",
        }
    }
}

impl FromStr for CommissionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERCENTAGE" => Ok(CommissionKind::Percentage),
            "FIXED" => Ok(CommissionKind::Fixed),
            other => Err(format!("Unknown commission kind: {}", other)),
        }
    }
}

/// One row of commission configuration.
///
/// `currency = None` is the global row for the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CommissionSetting {
    pub tx_type: CommissionType,
    pub currency: Option<Currency>,
    pub kind: CommissionKind,
    #[schema(value_type = String, example = "0.07")]
    pub value: Decimal,
    #[schema(value_type = Option<String>)]
    pub min_fee: Option<Decimal>,
    #[schema(value_type = Option<String>)]
    pub max_fee: Option<Decimal>,
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CommissionSetting {
    pub fn percentage(tx_type: CommissionType, currency: Option<Currency>, value: Decimal) -> Self {
        Self {
            tx_type,
            currency,
            kind: CommissionKind::Percentage,
            value,
            min_fee: None,
            max_fee: None,
            active: true,
            updated_at: Utc::now(),
        }
    }

    pub fn fixed(tx_type: CommissionType, currency: Option<Currency>, value: Decimal) -> Self {
        Self {
            kind: CommissionKind::Fixed,
            ..Self::percentage(tx_type, currency, value)
        }
    }

    pub fn with_bounds(mut self, min_fee: Option<Decimal>, max_fee: Option<Decimal>) -> Self {
        self.min_fee = min_fee;
        self.max_fee = max_fee;
        self
    }

    /// Reject settings that could produce a negative or inverted fee window.
    pub fn validate(&self) -> Result<(), String> {
        if self.value < Decimal::ZERO {
            return Err("value must not be negative".into());
        }
        if self.kind == CommissionKind::Percentage && self.value >= Decimal::ONE {
            return Err("percentage value must be below 1".into());
        }
        if let (Some(min), Some(max)) = (self.min_fee, self.max_fee) {
            if min > max {
                return Err("min_fee exceeds max_fee".into());
            }
        }
        if self.min_fee.is_some_and(|m| m < Decimal::ZERO)
            || self.max_fee.is_some_and(|m| m < Decimal::ZERO)
        {
            return Err("fee bounds must not be negative".into());
        }
        Ok(())
    }
}

/// Which layer of configuration produced the fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SettingSource {
    Specific,
    Global,
    PlatformDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CommissionResult {
    #[schema(value_type = String)]
    pub fee: Decimal,
    /// Effective rate (or flat value) after the plan multiplier
    #[schema(value_type = String)]
    pub rate: Decimal,
    #[schema(value_type = String)]
    pub net_amount: Decimal,
    pub kind: CommissionKind,
    pub source: SettingSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpreadSide {
    /// User buys; price marked up
    Buy,
    /// User sells; price marked down
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpreadResult {
    pub market_price: Decimal,
    pub price: Decimal,
    /// Spread fraction after the plan multiplier
    pub spread: Decimal,
}
