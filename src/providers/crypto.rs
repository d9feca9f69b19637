//! Crypto payment processor.
//!
//! Each wallet gets one receiving address that is reused for later deposits.
//! Minimum deposits per currency come from config.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tracing::info;

use super::{
    GatewayError, InitializeRequest, InitializeResponse, PaymentGateway, PaymentInstructions,
    PaymentMethod, PayoutRequest, PayoutResponse, VerifyResult, WebhookEvent, WebhookEventKind,
    http_client, parse_currencies, status_from_str,
};
use crate::config::ProviderConfig;
use crate::core_types::Currency;
use crate::fx::sources::json_decimal;

pub struct CryptoGateway {
    config: ProviderConfig,
    currencies: Vec<Currency>,
    client: reqwest::Client,
}

impl CryptoGateway {
    pub fn new(config: ProviderConfig) -> Result<Self, GatewayError> {
        let currencies = parse_currencies(&config.settlement_currencies);
        if currencies.is_empty() || currencies.iter().any(|c| !c.is_crypto()) {
            return Err(GatewayError::NotConfigured(format!(
                "{} must list crypto settlement currencies",
                config.name
            )));
        }
        Ok(Self {
            config,
            currencies,
            client: http_client()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_kind(event: &str) -> WebhookEventKind {
        match event {
            "deposit.confirmed" => WebhookEventKind::ChargeSucceeded,
            "deposit.failed" | "deposit.expired" => WebhookEventKind::ChargeFailed,
            "withdrawal.confirmed" => WebhookEventKind::PayoutSucceeded,
            "withdrawal.failed" => WebhookEventKind::PayoutFailed,
            other => WebhookEventKind::Other(other.to_string()),
        }
    }

    async fn create_address(&self, req: &InitializeRequest) -> Result<String, GatewayError> {
        let body: Value = self
            .client
            .post(self.url("/addresses"))
            .header("x-api-key", &self.config.secret_key)
            .json(&json!({
                "currency": req.currency.as_str(),
                "label": format!("user-{}", req.user_id),
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.get("address")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidPayload("missing address".into()))
    }
}

#[async_trait]
impl PaymentGateway for CryptoGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::Crypto
    }

    fn settlement_currencies(&self) -> &[Currency] {
        &self.currencies
    }

    fn webhook_secret(&self) -> &str {
        &self.config.webhook_secret
    }

    fn signature_header(&self) -> &str {
        &self.config.signature_header
    }

    fn min_deposit(&self, currency: &Currency) -> Option<Decimal> {
        self.config.min_deposits.get(currency.as_str()).copied()
    }

    /// Crypto cannot be charged in another currency.
    fn settlement_currency_for(&self, requested: &Currency) -> Option<Currency> {
        self.supports_currency(requested).then(|| requested.clone())
    }

    async fn initialize(&self, req: &InitializeRequest) -> Result<InitializeResponse, GatewayError> {
        if !self.supports_currency(&req.currency) {
            return Err(GatewayError::UnsupportedCurrency(req.currency.to_string()));
        }
        let address = match &req.existing_address {
            Some(addr) => addr.clone(),
            None => {
                let addr = self.create_address(req).await?;
                info!(user_id = req.user_id, currency = %req.currency, "Issued crypto deposit address");
                addr
            }
        };
        Ok(InitializeResponse {
            external_reference: req.reference.clone(),
            instructions: PaymentInstructions::CryptoAddress {
                address,
                min_deposit: self.min_deposit(&req.currency).unwrap_or(Decimal::ZERO),
            },
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifyResult, GatewayError> {
        let resp = self
            .client
            .get(self.url(&format!("/deposits/{}", reference)))
            .header("x-api-key", &self.config.secret_key)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(reference.to_string()));
        }
        let body: Value = resp.error_for_status()?.json().await?;

        Ok(VerifyResult {
            status: body
                .get("status")
                .and_then(Value::as_str)
                .map(status_from_str)
                .ok_or_else(|| GatewayError::InvalidPayload("missing status".into()))?,
            amount: body.get("amount").and_then(json_decimal).unwrap_or(Decimal::ZERO),
            currency: body
                .get("currency")
                .and_then(Value::as_str)
                .and_then(|c| Currency::new(c).ok())
                .ok_or_else(|| GatewayError::InvalidPayload("missing currency".into()))?,
        })
    }

    /// `{"type": "...", "data": {"order_id", "tx_hash", "amount", "currency"}}`
    fn parse_webhook(&self, raw: &[u8]) -> Result<WebhookEvent, GatewayError> {
        super::parse_event_envelope(raw, "type", "order_id", "tx_hash", Self::map_kind)
    }

    async fn initiate_payout(&self, req: &PayoutRequest) -> Result<PayoutResponse, GatewayError> {
        let resp = self
            .client
            .post(self.url("/withdrawals"))
            .header("x-api-key", &self.config.secret_key)
            .json(&json!({
                "address": req.destination,
                "amount": req.amount.to_string(),
                "currency": req.currency.as_str(),
                "order_id": req.reference,
            }))
            .send()
            .await?;
        if resp.status().is_client_error() {
            let msg = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(msg));
        }
        let body: Value = resp.error_for_status()?.json().await?;

        Ok(PayoutResponse {
            external_reference: body
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(&req.reference)
                .to_string(),
        })
    }
}
