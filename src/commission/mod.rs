//! Commission & Spread Calculator
//!
//! Fee resolution order for `(type, currency)`:
//! 1. active setting for that exact currency
//! 2. active global setting for the type
//! 3. platform default rate from config
//!
//! The plan multiplier scales the resolved rate (or flat value) before the
//! fee is computed, then `[min_fee, max_fee]` clamps the result.

pub mod calculator;
pub mod store;
pub mod types;

pub use calculator::CommissionCalculator;
pub use store::{CommissionStore, MemoryCommissionStore, PgCommissionStore};
pub use types::{
    CommissionKind, CommissionResult, CommissionSetting, CommissionType, SettingSource,
    SpreadResult, SpreadSide,
};

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CommissionError {
    #[error("Commission store error: {0}")]
    Store(String),

    #[error("Invalid commission setting: {0}")]
    InvalidSetting(String),

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount {amount} does not cover the fee {fee}")]
    AmountBelowFee { amount: Decimal, fee: Decimal },
}

impl CommissionError {
    pub fn code(&self) -> &'static str {
        match self {
            CommissionError::Store(_) => "COMMISSION_STORE_ERROR",
            CommissionError::InvalidSetting(_) => "INVALID_COMMISSION_SETTING",
            CommissionError::InvalidAmount => "INVALID_AMOUNT",
            CommissionError::AmountBelowFee { .. } => "AMOUNT_BELOW_FEE",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            CommissionError::Store(_) => 500,
            CommissionError::InvalidSetting(_)
            | CommissionError::InvalidAmount
            | CommissionError::AmountBelowFee { .. } => 400,
        }
    }
}

impl From<sqlx::Error> for CommissionError {
    fn from(e: sqlx::Error) -> Self {
        CommissionError::Store(e.to_string())
    }
}
