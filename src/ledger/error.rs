use rust_decimal::Decimal;
use thiserror::Error;

use super::state::TxStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Wallet not found")]
    WalletNotFound,

    #[error("Wallet is frozen")]
    WalletFrozen,

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Decimal, required: Decimal },

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition { from: TxStatus, to: TxStatus },

    #[error("Transaction already failed: {0}")]
    AlreadyFailed(String),

    #[error("Duplicate transaction: {0}")]
    Duplicate(String),

    #[error("Balance update failed: {0}")]
    BalanceUpdateFailed(String),

    /// Funds are in an inconsistent state and need a human
    #[error("Reconciliation required: {0}")]
    ReconciliationRequired(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::WalletNotFound => "WALLET_NOT_FOUND",
            LedgerError::WalletFrozen => "WALLET_FROZEN",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            LedgerError::AlreadyFailed(_) => "ALREADY_FAILED",
            LedgerError::Duplicate(_) => "DUPLICATE_TRANSACTION",
            LedgerError::BalanceUpdateFailed(_) => "BALANCE_UPDATE_FAILED",
            LedgerError::ReconciliationRequired(_) => "RECONCILIATION_REQUIRED",
            LedgerError::Database(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::TransactionNotFound(_) | LedgerError::WalletNotFound => 404,
            LedgerError::Duplicate(_) => 409,
            LedgerError::WalletFrozen
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::InvalidTransition { .. }
            | LedgerError::AlreadyFailed(_) => 422,
            LedgerError::BalanceUpdateFailed(_)
            | LedgerError::ReconciliationRequired(_)
            | LedgerError::Database(_) => 500,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return LedgerError::Duplicate(db.message().to_string());
            }
        }
        LedgerError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::WalletNotFound.code(), "WALLET_NOT_FOUND");
        assert_eq!(
            LedgerError::InsufficientFunds {
                available: dec!(1),
                required: dec!(2)
            }
            .code(),
            "INSUFFICIENT_FUNDS"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::TransactionNotFound("x".into()).http_status(), 404);
        assert_eq!(LedgerError::Duplicate("x".into()).http_status(), 409);
        assert_eq!(LedgerError::WalletFrozen.http_status(), 422);
        assert_eq!(LedgerError::Database("x".into()).http_status(), 500);
    }

    #[test]
    fn test_display() {
        let err = LedgerError::InvalidTransition {
            from: TxStatus::Completed,
            to: TxStatus::Failed,
        };
        assert_eq!(err.to_string(), "Invalid status transition COMPLETED -> FAILED");
    }
}
