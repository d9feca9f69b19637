//! Funding flows: money entering, leaving, and moving between users.
//!
//! - [`deposit`]: PENDING deposit plus provider instructions; settled later by webhook
//! - [`withdraw`]: hold, then provider payout; resolved by webhook
//! - [`transfer`]: user-to-user pair in one currency
//! - [`expiry`]: background failure of abandoned deposits

pub mod deposit;
pub mod error;
pub mod expiry;
pub mod transfer;
pub mod withdraw;

pub use deposit::{DepositRequest, DepositResponse, DepositService, TransactionStatus};
pub use error::FundingError;
pub use expiry::{ExpiryConfig, ExpiryWorker};
pub use transfer::{TransferRequest, TransferResponse, TransferService};
pub use withdraw::{WithdrawRequest, WithdrawResponse, WithdrawService};
