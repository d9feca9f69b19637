use rust_decimal::Decimal;
use thiserror::Error;

use crate::commission::CommissionError;
use crate::fx::FxError;
use crate::ledger::LedgerError;
use crate::money::MoneyError;
use crate::providers::{GatewayError, PaymentMethod};

#[derive(Error, Debug)]
pub enum FundingError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),

    #[error("Currency not supported: {0}")]
    UnsupportedCurrency(String),

    #[error("No provider configured for {0}")]
    MethodUnavailable(PaymentMethod),

    #[error("Payout destination is required")]
    InvalidDestination,

    #[error("Cannot transfer to yourself")]
    SelfTransfer,

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Decimal, required: Decimal },

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Idempotency key already used for another operation: {0}")]
    IdempotencyConflict(String),

    #[error("Payment provider error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Fx(#[from] FxError),

    #[error(transparent)]
    Commission(#[from] CommissionError),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for FundingError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds { available, required } => {
                FundingError::InsufficientFunds { available, required }
            }
            LedgerError::TransactionNotFound(r) => FundingError::NotFound(r),
            other => FundingError::Ledger(other),
        }
    }
}

impl FundingError {
    pub fn code(&self) -> &'static str {
        match self {
            FundingError::InvalidAmount(_) => "INVALID_AMOUNT",
            FundingError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            FundingError::MethodUnavailable(_) => "METHOD_UNAVAILABLE",
            FundingError::InvalidDestination => "INVALID_DESTINATION",
            FundingError::SelfTransfer => "SELF_TRANSFER",
            FundingError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            FundingError::NotFound(_) => "TRANSACTION_NOT_FOUND",
            FundingError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            FundingError::Gateway(e) => e.code(),
            FundingError::Fx(e) => e.code(),
            FundingError::Commission(e) => e.code(),
            FundingError::Ledger(e) => e.code(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            FundingError::InvalidAmount(_)
            | FundingError::UnsupportedCurrency(_)
            | FundingError::InvalidDestination
            | FundingError::SelfTransfer => 400,
            FundingError::NotFound(_) => 404,
            FundingError::IdempotencyConflict(_) => 409,
            FundingError::InsufficientFunds { .. } => 422,
            FundingError::MethodUnavailable(_) => 503,
            FundingError::Gateway(e) => e.http_status(),
            FundingError::Fx(e) => e.http_status(),
            FundingError::Commission(e) => e.http_status(),
            FundingError::Ledger(e) => e.http_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ledger_errors_are_lifted() {
        let e: FundingError = LedgerError::InsufficientFunds {
            available: dec!(1),
            required: dec!(2),
        }
        .into();
        assert_eq!(e.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(e.http_status(), 422);

        let e: FundingError = LedgerError::TransactionNotFound("DEP-1".into()).into();
        assert_eq!(e.http_status(), 404);

        let e: FundingError = LedgerError::Database("down".into()).into();
        assert_eq!(e.code(), "DATABASE_ERROR");
        assert_eq!(e.http_status(), 500);
    }

    #[test]
    fn test_provider_errors_map_to_bad_gateway() {
        let e: FundingError = GatewayError::Http("timeout".into()).into();
        assert_eq!(e.http_status(), 502);
        assert_eq!(FundingError::MethodUnavailable(PaymentMethod::Crypto).http_status(), 503);
    }
}
