//! Gateway types module
//!
//! ## Submodules
//! - [`requests`]: request bodies and query strings
//! - [`response`]: response envelope, `ApiError` and error codes

pub mod requests;
pub mod response;

pub use requests::{
    CommissionSettingBody, DepositBody, FxRateQuery, LimitQuery, SwapExecuteBody, SwapPreviewBody,
    TransferBody, WithdrawBody, amount_in,
};
pub use response::{ApiError, ApiResponse, ApiResult, error_codes, ok};
