//! Gateway Adapter
//!
//! One [`PaymentGateway`] per payment method. Adapters only talk to the
//! provider; they never touch wallets or transactions. The deposit flow
//! records the PENDING transaction before asking an adapter for payment
//! instructions.

pub mod bank;
pub mod card;
pub mod crypto;
pub mod mock;

pub use bank::BankTransferGateway;
pub use card::CardGateway;
pub use crypto::CryptoGateway;
pub use mock::MockGateway;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

use crate::core_types::Currency;
use crate::fx::sources::json_decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Crypto,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Crypto => "crypto",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "crypto" => Ok(PaymentMethod::Crypto),
            other => Err(format!("Unknown payment method: {}", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Provider request failed: {0}")]
    Http(String),

    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid provider payload: {0}")]
    InvalidPayload(String),

    #[error("Currency not supported by provider: {0}")]
    UnsupportedCurrency(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Reference not found at provider: {0}")]
    NotFound(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Http(_) => "PROVIDER_UNAVAILABLE",
            GatewayError::Rejected(_) => "PROVIDER_REJECTED",
            GatewayError::InvalidPayload(_) => "PROVIDER_INVALID_PAYLOAD",
            GatewayError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            GatewayError::NotConfigured(_) => "PROVIDER_NOT_CONFIGURED",
            GatewayError::NotFound(_) => "PROVIDER_REFERENCE_NOT_FOUND",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::UnsupportedCurrency(_) => 400,
            GatewayError::NotFound(_) => 404,
            GatewayError::NotConfigured(_) => 503,
            GatewayError::Http(_) | GatewayError::Rejected(_) | GatewayError::InvalidPayload(_) => 502,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Http(e.to_string())
    }
}

/// Charge request handed to an adapter after the PENDING row exists.
#[derive(Debug, Clone)]
pub struct InitializeRequest {
    /// Our transaction reference, echoed back by the provider
    pub reference: String,
    pub user_id: i64,
    pub user_email: String,
    /// Amount to charge, already converted to `currency`
    pub amount: Decimal,
    pub currency: Currency,
    /// Previously issued crypto address for this wallet, if any
    pub existing_address: Option<String>,
}

/// What the user needs to complete the payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentInstructions {
    Redirect {
        url: String,
    },
    BankDetails {
        bank_name: String,
        account_name: String,
        account_number: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        routing_number: Option<String>,
        /// Must be quoted in the transfer narration
        reference: String,
    },
    CryptoAddress {
        address: String,
        #[schema(value_type = String)]
        min_deposit: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitializeResponse {
    pub external_reference: String,
    pub instructions: PaymentInstructions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Success,
    Failed,
    Pending,
}

/// Provider-side view of a charge or payout.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyResult {
    pub status: ProviderStatus,
    pub amount: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    ChargeSucceeded,
    ChargeFailed,
    PayoutSucceeded,
    PayoutFailed,
    /// Anything we do not act on
    Other(String),
}

impl WebhookEventKind {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, WebhookEventKind::Other(_))
    }
}

/// Provider-agnostic webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    /// Our transaction reference
    pub reference: String,
    /// Provider's own id for the charge (payment hash, tx hash)
    pub external_id: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<Currency>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub reference: String,
    pub amount: Decimal,
    pub currency: Currency,
    /// Bank account, card token, or chain address
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutResponse {
    pub external_reference: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider key; also the `{provider}` segment of its webhook route
    fn name(&self) -> &str;

    fn method(&self) -> PaymentMethod;

    /// Currencies the provider can charge in. The first one is the default.
    fn settlement_currencies(&self) -> &[Currency];

    fn webhook_secret(&self) -> &str;

    /// Header carrying the hex HMAC-SHA256 of the raw body
    fn signature_header(&self) -> &str;

    /// Minimum accepted deposit for `currency`, if the provider has one
    fn min_deposit(&self, _currency: &Currency) -> Option<Decimal> {
        None
    }

    fn supports_currency(&self, currency: &Currency) -> bool {
        self.settlement_currencies().contains(currency)
    }

    /// Currency the provider will actually charge for a request in `requested`.
    fn settlement_currency_for(&self, requested: &Currency) -> Option<Currency> {
        if self.supports_currency(requested) {
            Some(requested.clone())
        } else {
            self.settlement_currencies().first().cloned()
        }
    }

    async fn initialize(&self, req: &InitializeRequest) -> Result<InitializeResponse, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<VerifyResult, GatewayError>;

    fn parse_webhook(&self, raw: &[u8]) -> Result<WebhookEvent, GatewayError>;

    async fn initiate_payout(&self, req: &PayoutRequest) -> Result<PayoutResponse, GatewayError>;
}

/// Adapters keyed by payment method and provider name.
#[derive(Default, Clone)]
pub struct GatewayRegistry {
    gateways: Vec<Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.push(gateway);
        self
    }

    pub fn by_method(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.iter().find(|g| g.method() == method).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.iter().find(|g| g.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.gateways.iter().map(|g| g.name().to_string()).collect()
    }
}

/// Parse the `{event, data: {...}}` envelope used by the card and bank
/// providers. `map_kind` translates provider event names.
pub(crate) fn parse_event_envelope(
    raw: &[u8],
    event_field: &str,
    reference_field: &str,
    id_field: &str,
    map_kind: impl Fn(&str) -> WebhookEventKind,
) -> Result<WebhookEvent, GatewayError> {
    let body: Value = serde_json::from_slice(raw)
        .map_err(|e| GatewayError::InvalidPayload(format!("malformed JSON: {}", e)))?;

    let event = body
        .get(event_field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidPayload(format!("missing `{}`", event_field)))?;
    let data = body
        .get("data")
        .ok_or_else(|| GatewayError::InvalidPayload("missing `data`".into()))?;
    let reference = data
        .get(reference_field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidPayload(format!("missing `data.{}`", reference_field)))?;

    let external_id = data.get(id_field).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let currency = data
        .get("currency")
        .and_then(Value::as_str)
        .and_then(|c| Currency::new(c).ok());
    let reason = data
        .get("reason")
        .or_else(|| data.get("gateway_response"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(WebhookEvent {
        kind: map_kind(event),
        reference: reference.to_string(),
        external_id,
        amount: data.get("amount").and_then(json_decimal),
        currency,
        reason,
    })
}

/// Parse `settlement_currencies` entries from config, skipping invalid codes.
pub(crate) fn parse_currencies(codes: &[String]) -> Vec<Currency> {
    codes.iter().filter_map(|c| Currency::new(c).ok()).collect()
}

pub(crate) fn http_client() -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .map_err(GatewayError::from)
}

pub(crate) fn status_from_str(s: &str) -> ProviderStatus {
    match s.to_ascii_lowercase().as_str() {
        "success" | "successful" | "completed" | "confirmed" | "paid" => ProviderStatus::Success,
        "failed" | "reversed" | "abandoned" | "expired" | "cancelled" => ProviderStatus::Failed,
        _ => ProviderStatus::Pending,
    }
}
