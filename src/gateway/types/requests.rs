//! Request bodies and query strings.
//!
//! Amounts travel as strings and are parsed with [`parse_amount`], which
//! rejects floats-as-text like `.5` and anything beyond the currency scale.

use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use super::ApiError;
use crate::commission::{CommissionKind, CommissionSetting, CommissionType};
use crate::core_types::{Currency, UserId};
use crate::ledger::DepositPurpose;
use crate::money::parse_amount;
use crate::providers::PaymentMethod;

/// Parse a client amount for `currency`, mapping failures to 400.
pub fn amount_in(raw: &str, currency: &Currency) -> Result<Decimal, ApiError> {
    parse_amount(raw, currency).map_err(|e| ApiError::bad_request(format!("Invalid amount: {}", e)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DepositBody {
    #[schema(value_type = String, example = "USD")]
    pub currency: Currency,
    /// Gross amount, fee included
    #[schema(example = "100.00")]
    pub amount: String,
    pub method: PaymentMethod,
    #[serde(default)]
    pub purpose: DepositPurpose,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WithdrawBody {
    #[schema(value_type = String, example = "USD")]
    pub currency: Currency,
    #[schema(example = "50.00")]
    pub amount: String,
    pub method: PaymentMethod,
    /// Bank account or chain address
    pub destination: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransferBody {
    pub to_user_id: UserId,
    #[schema(value_type = String, example = "USD")]
    pub currency: Currency,
    #[schema(example = "25.00")]
    pub amount: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SwapPreviewBody {
    #[schema(value_type = String, example = "BTC")]
    pub from_currency: Currency,
    #[schema(value_type = String, example = "USD")]
    pub to_currency: Currency,
    #[schema(example = "0.5")]
    pub amount: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SwapExecuteBody {
    #[schema(value_type = String, example = "BTC")]
    pub from_currency: Currency,
    #[schema(value_type = String, example = "USD")]
    pub to_currency: Currency,
    #[schema(example = "0.5")]
    pub amount: String,
    /// From a previous preview; omitted or expired means re-price
    #[serde(default)]
    pub lock_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FxRateQuery {
    /// Source currency
    pub from: String,
    /// Target currency
    pub to: String,
    /// Apply the cross-currency safety buffer
    #[serde(default)]
    pub buffered: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LimitQuery {
    /// Max rows (default 50, capped at 500)
    pub limit: Option<usize>,
}

impl LimitQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(50).clamp(1, 500)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommissionSettingBody {
    pub tx_type: CommissionType,
    /// Omit for the global row of the type
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub currency: Option<Currency>,
    pub kind: CommissionKind,
    #[schema(example = "0.07")]
    pub value: String,
    #[serde(default)]
    pub min_fee: Option<String>,
    #[serde(default)]
    pub max_fee: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl CommissionSettingBody {
    pub fn into_setting(self) -> Result<CommissionSetting, ApiError> {
        let decimal = |field: &str, raw: &str| {
            raw.trim()
                .parse::<Decimal>()
                .map_err(|_| ApiError::bad_request(format!("Invalid {}: {}", field, raw)))
        };
        let value = decimal("value", &self.value)?;
        let min_fee = self.min_fee.as_deref().map(|v| decimal("min_fee", v)).transpose()?;
        let max_fee = self.max_fee.as_deref().map(|v| decimal("max_fee", v)).transpose()?;

        let base = match self.kind {
            CommissionKind::Percentage => CommissionSetting::percentage(self.tx_type, self.currency, value),
            CommissionKind::Fixed => CommissionSetting::fixed(self.tx_type, self.currency, value),
        };
        let mut setting = base.with_bounds(min_fee, max_fee);
        setting.active = self.active;
        setting.validate().map_err(ApiError::bad_request)?;
        Ok(setting)
    }
}
