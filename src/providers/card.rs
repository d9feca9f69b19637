//! Hosted-checkout card provider.
//!
//! Initialization returns a redirect URL; the provider calls back with
//! `charge.success` / `charge.failed` and `transfer.success` /
//! `transfer.failed` for payouts.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    GatewayError, InitializeRequest, InitializeResponse, PaymentGateway, PaymentInstructions,
    PaymentMethod, PayoutRequest, PayoutResponse, VerifyResult, WebhookEvent, WebhookEventKind,
    http_client, parse_currencies, parse_event_envelope, status_from_str,
};
use crate::config::ProviderConfig;
use crate::core_types::Currency;
use crate::fx::sources::json_decimal;

pub struct CardGateway {
    config: ProviderConfig,
    currencies: Vec<Currency>,
    client: reqwest::Client,
}

impl CardGateway {
    pub fn new(config: ProviderConfig) -> Result<Self, GatewayError> {
        let currencies = parse_currencies(&config.settlement_currencies);
        if currencies.is_empty() {
            return Err(GatewayError::NotConfigured(format!(
                "{} has no settlement currencies",
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

    /// Unwrap `{status: true, data: {...}}`, turning `status: false` into a rejection.
    fn data(body: Value) -> Result<Value, GatewayError> {
        if body.get("status").and_then(Value::as_bool) == Some(false) {
            let msg = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(GatewayError::Rejected(msg.to_string()));
        }
        body.get("data")
            .cloned()
            .ok_or_else(|| GatewayError::InvalidPayload("missing `data`".into()))
    }

    fn map_kind(event: &str) -> WebhookEventKind {
        match event {
            "charge.success" => WebhookEventKind::ChargeSucceeded,
            "charge.failed" => WebhookEventKind::ChargeFailed,
            "transfer.success" => WebhookEventKind::PayoutSucceeded,
            "transfer.failed" | "transfer.reversed" => WebhookEventKind::PayoutFailed,
            other => WebhookEventKind::Other(other.to_string()),
        }
    }
}

#[async_trait]
impl PaymentGateway for CardGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
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

    async fn initialize(&self, req: &InitializeRequest) -> Result<InitializeResponse, GatewayError> {
        if !self.supports_currency(&req.currency) {
            return Err(GatewayError::UnsupportedCurrency(req.currency.to_string()));
        }

        let mut payload = json!({
            "email": req.user_email,
            "amount": req.amount.to_string(),
            "currency": req.currency.as_str(),
            "reference": req.reference,
            "metadata": { "user_id": req.user_id },
        });
        if let Some(callback) = &self.config.callback_url {
            payload["callback_url"] = json!(callback);
        }

        let body: Value = self
            .client
            .post(self.url("/transaction/initialize"))
            .bearer_auth(&self.config.secret_key)
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;
        let data = Self::data(body)?;

        let url = data
            .get("authorization_url")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidPayload("missing authorization_url".into()))?;
        debug!(reference = %req.reference, provider = %self.config.name, "Card checkout created");

        Ok(InitializeResponse {
            external_reference: data
                .get("reference")
                .and_then(Value::as_str)
                .unwrap_or(&req.reference)
                .to_string(),
            instructions: PaymentInstructions::Redirect {
                url: url.to_string(),
            },
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifyResult, GatewayError> {
        let resp = self
            .client
            .get(self.url(&format!("/transaction/verify/{}", reference)))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(reference.to_string()));
        }
        let data = Self::data(resp.json().await?)?;

        let status = data
            .get("status")
            .and_then(Value::as_str)
            .map(status_from_str)
            .ok_or_else(|| GatewayError::InvalidPayload("missing status".into()))?;
        let amount = data
            .get("amount")
            .and_then(json_decimal)
            .unwrap_or(Decimal::ZERO);
        let currency = data
            .get("currency")
            .and_then(Value::as_str)
            .and_then(|c| Currency::new(c).ok())
            .ok_or_else(|| GatewayError::InvalidPayload("missing currency".into()))?;

        Ok(VerifyResult {
            status,
            amount,
            currency,
        })
    }

    fn parse_webhook(&self, raw: &[u8]) -> Result<WebhookEvent, GatewayError> {
        parse_event_envelope(raw, "event", "reference", "id", Self::map_kind)
    }

    async fn initiate_payout(&self, req: &PayoutRequest) -> Result<PayoutResponse, GatewayError> {
        let body: Value = self
            .client
            .post(self.url("/transfer"))
            .bearer_auth(&self.config.secret_key)
            .json(&json!({
                "source": "balance",
                "amount": req.amount.to_string(),
                "currency": req.currency.as_str(),
                "reference": req.reference,
                "recipient": req.destination,
            }))
            .send()
            .await?
            .json()
            .await?;
        let data = Self::data(body)?;

        Ok(PayoutResponse {
            external_reference: data
                .get("transfer_code")
                .and_then(Value::as_str)
                .unwrap_or(&req.reference)
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            name: "cardpay".into(),
            base_url: "https://api.cardpay.example/".into(),
            secret_key: "sk".into(),
            webhook_secret: "whsec".into(),
            signature_header: "x-signature".into(),
            settlement_currencies: vec!["NGN".into(), "USD".into()],
            callback_url: None,
            bank_details: None,
            min_deposits: Default::default(),
        }
    }

    #[test]
    fn test_settlement_currency_selection() {
        let gw = CardGateway::new(config()).unwrap();
        let usd = Currency::new("USD").unwrap();
        let eur = Currency::new("EUR").unwrap();
        assert_eq!(gw.settlement_currency_for(&usd), Some(usd));
        assert_eq!(
            gw.settlement_currency_for(&eur),
            Some(Currency::new("NGN").unwrap())
        );
        assert_eq!(gw.url("/transfer"), "https://api.cardpay.example/transfer");
    }

    #[test]
    fn test_requires_settlement_currency() {
        let mut cfg = config();
        cfg.settlement_currencies.clear();
        assert!(matches!(
            CardGateway::new(cfg),
            Err(GatewayError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_webhook_event_names() {
        let gw = CardGateway::new(config()).unwrap();
        let ev = gw
            .parse_webhook(br#"{"event":"transfer.reversed","data":{"reference":"WDR-1"}}"#)
            .unwrap();
        assert_eq!(ev.kind, WebhookEventKind::PayoutFailed);

        let ev = gw
            .parse_webhook(br#"{"event":"subscription.create","data":{"reference":"X"}}"#)
            .unwrap();
        assert!(!ev.kind.is_actionable());
    }

    #[test]
    fn test_rejection_envelope() {
        let err = CardGateway::data(json!({"status": false, "message": "Invalid key"})).unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(m) if m == "Invalid key"));
    }
}
