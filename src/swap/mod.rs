//! Swap Engine
//!
//! `preview` prices a conversion and locks the quote; `execute` debits the
//! source wallet and credits the destination as a SWAP_OUT/SWAP_IN pair
//! sharing one reference. The quoted rate carries the spread, so
//! `amount_out = (amount_in - fee) * rate` up to the destination scale.

pub mod engine;
pub mod quote;

pub use engine::{SwapEngine, SwapResult};
pub use quote::{LockLookup, QuoteBook, SwapQuote};

use rust_decimal::Decimal;
use thiserror::Error;

use crate::commission::CommissionError;
use crate::fx::FxError;
use crate::ledger::LedgerError;

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Cannot swap a currency into itself")]
    SameCurrency,

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Decimal, required: Decimal },

    #[error("Quote lock does not match the requested swap")]
    QuoteMismatch,

    #[error("Idempotency key already used for another operation: {0}")]
    IdempotencyConflict(String),

    #[error(transparent)]
    Fx(#[from] FxError),

    #[error(transparent)]
    Commission(#[from] CommissionError),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for SwapError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds { available, required } => {
                SwapError::InsufficientFunds { available, required }
            }
            other => SwapError::Ledger(other),
        }
    }
}

impl SwapError {
    pub fn code(&self) -> &'static str {
        match self {
            SwapError::InvalidAmount(_) => "INVALID_AMOUNT",
            SwapError::SameCurrency => "SAME_CURRENCY",
            SwapError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            SwapError::QuoteMismatch => "QUOTE_MISMATCH",
            SwapError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            SwapError::Fx(e) => e.code(),
            SwapError::Commission(e) => e.code(),
            SwapError::Ledger(e) => e.code(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            SwapError::InvalidAmount(_) | SwapError::SameCurrency | SwapError::QuoteMismatch => 400,
            SwapError::InsufficientFunds { .. } => 422,
            SwapError::IdempotencyConflict(_) => 409,
            SwapError::Fx(e) => e.http_status(),
            SwapError::Commission(e) => e.http_status(),
            SwapError::Ledger(e) => e.http_status(),
        }
    }
}
