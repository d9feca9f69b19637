//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError`: error half of every handler result
//! - `error_codes`: Standard error code constants

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::commission::CommissionError;
use crate::funding::FundingError;
use crate::fx::FxError;
use crate::ledger::LedgerError;
use crate::swap::SwapError;
use crate::webhook::WebhookError;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    #[schema(example = 0)]
    pub code: i32,
    /// Response message
    #[schema(example = "ok")]
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create success response
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Create error response
    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Wrap `data` in a success envelope.
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

// ============================================================================
// Errors
// ============================================================================

/// HTTP status plus envelope code and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error_codes::MISSING_AUTH, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, error_codes::ADMIN_REQUIRED, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_codes::NOT_FOUND, msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error_codes::SERVICE_UNAVAILABLE, msg)
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }

    /// Map a domain error by its HTTP status and symbolic code.
    ///
    /// Server-side failures are logged here and reported without detail.
    fn from_domain(http_status: u16, name: &'static str, detail: String) -> Self {
        let status = StatusCode::from_u16(http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            tracing::error!(code = name, error = %detail, "Request failed");
            if status == StatusCode::SERVICE_UNAVAILABLE {
                return Self::new(status, error_codes::SERVICE_UNAVAILABLE, detail);
            }
            return Self::new(status, error_codes::INTERNAL_ERROR, "internal error");
        }
        Self::new(status, error_codes::for_name(name, status), detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

macro_rules! domain_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ApiError {
                fn from(e: $ty) -> Self {
                    ApiError::from_domain(e.http_status(), e.code(), e.to_string())
                }
            }
        )*
    };
}

domain_error!(FundingError, SwapError, FxError, CommissionError, LedgerError, WebhookError);

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    use axum::http::StatusCode;

    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const INVALID_AMOUNT: i32 = 1003;
    pub const UNSUPPORTED_CURRENCY: i32 = 1004;
    pub const QUOTE_MISMATCH: i32 = 1005;
    pub const SELF_TRANSFER: i32 = 1006;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;
    pub const ADMIN_REQUIRED: i32 = 2003;
    pub const INVALID_SIGNATURE: i32 = 2004;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4009;
    pub const UNPROCESSABLE: i32 = 4022;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const PROVIDER_ERROR: i32 = 5002;

    /// Envelope code for a domain error's symbolic name.
    pub fn for_name(name: &str, status: StatusCode) -> i32 {
        match name {
            "INSUFFICIENT_FUNDS" => INSUFFICIENT_BALANCE,
            "INVALID_AMOUNT" | "AMOUNT_BELOW_FEE" | "PRECISION_OVERFLOW" | "INVALID_FORMAT" => INVALID_AMOUNT,
            "UNSUPPORTED_CURRENCY" => UNSUPPORTED_CURRENCY,
            "QUOTE_MISMATCH" => QUOTE_MISMATCH,
            "SELF_TRANSFER" => SELF_TRANSFER,
            "MISSING_SIGNATURE" | "INVALID_SIGNATURE" => INVALID_SIGNATURE,
            _ => match status {
                StatusCode::UNAUTHORIZED => AUTH_FAILED,
                StatusCode::NOT_FOUND => NOT_FOUND,
                StatusCode::CONFLICT => CONFLICT,
                StatusCode::UNPROCESSABLE_ENTITY => UNPROCESSABLE,
                StatusCode::BAD_GATEWAY => PROVIDER_ERROR,
                s if s.is_client_error() => INVALID_PARAMETER,
                _ => INTERNAL_ERROR,
            },
        }
    }
}
