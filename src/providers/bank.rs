//! Bank-transfer collection.
//!
//! No redirect: the user is shown static account details and a reference to
//! quote in the transfer narration. The provider reports matched transfers
//! via `transfer.received` and bounced ones via `transfer.rejected`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::{
    GatewayError, InitializeRequest, InitializeResponse, PaymentGateway, PaymentInstructions,
    PaymentMethod, PayoutRequest, PayoutResponse, VerifyResult, WebhookEvent, WebhookEventKind,
    http_client, parse_currencies, parse_event_envelope, status_from_str,
};
use crate::config::{BankDetailsConfig, ProviderConfig};
use crate::core_types::Currency;
use crate::fx::sources::json_decimal;

pub struct BankTransferGateway {
    config: ProviderConfig,
    details: BankDetailsConfig,
    currencies: Vec<Currency>,
    client: reqwest::Client,
}

impl BankTransferGateway {
    pub fn new(config: ProviderConfig) -> Result<Self, GatewayError> {
        let details = config.bank_details.clone().ok_or_else(|| {
            GatewayError::NotConfigured(format!("{} has no bank_details", config.name))
        })?;
        let currencies = parse_currencies(&config.settlement_currencies);
        if currencies.is_empty() {
            return Err(GatewayError::NotConfigured(format!(
                "{} has no settlement currencies",
                config.name
            )));
        }
        Ok(Self {
            config,
            details,
            currencies,
            client: http_client()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_kind(event: &str) -> WebhookEventKind {
        match event {
            "transfer.received" => WebhookEventKind::ChargeSucceeded,
            "transfer.rejected" => WebhookEventKind::ChargeFailed,
            "payout.success" => WebhookEventKind::PayoutSucceeded,
            "payout.failed" => WebhookEventKind::PayoutFailed,
            other => WebhookEventKind::Other(other.to_string()),
        }
    }
}

#[async_trait]
impl PaymentGateway for BankTransferGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::BankTransfer
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
        Ok(InitializeResponse {
            external_reference: req.reference.clone(),
            instructions: PaymentInstructions::BankDetails {
                bank_name: self.details.bank_name.clone(),
                account_name: self.details.account_name.clone(),
                account_number: self.details.account_number.clone(),
                routing_number: self.details.routing_number.clone(),
                reference: req.reference.clone(),
            },
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifyResult, GatewayError> {
        let resp = self
            .client
            .get(self.url(&format!("/collections/{}", reference)))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(reference.to_string()));
        }
        let body: Value = resp.error_for_status()?.json().await?;

        let status = body
            .get("status")
            .and_then(Value::as_str)
            .map(status_from_str)
            .ok_or_else(|| GatewayError::InvalidPayload("missing status".into()))?;
        let currency = body
            .get("currency")
            .and_then(Value::as_str)
            .and_then(|c| Currency::new(c).ok())
            .ok_or_else(|| GatewayError::InvalidPayload("missing currency".into()))?;

        Ok(VerifyResult {
            status,
            amount: body.get("amount").and_then(json_decimal).unwrap_or(Decimal::ZERO),
            currency,
        })
    }

    fn parse_webhook(&self, raw: &[u8]) -> Result<WebhookEvent, GatewayError> {
        parse_event_envelope(raw, "event", "reference", "session_id", Self::map_kind)
    }

    async fn initiate_payout(&self, req: &PayoutRequest) -> Result<PayoutResponse, GatewayError> {
        let resp = self
            .client
            .post(self.url("/payouts"))
            .bearer_auth(&self.config.secret_key)
            .json(&json!({
                "amount": req.amount.to_string(),
                "currency": req.currency.as_str(),
                "reference": req.reference,
                "account": req.destination,
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> ProviderConfig {
        ProviderConfig {
            name: "bankpay".into(),
            base_url: "https://bank.example".into(),
            secret_key: "sk".into(),
            webhook_secret: "whsec".into(),
            signature_header: "x-bank-signature".into(),
            settlement_currencies: vec!["EUR".into()],
            callback_url: None,
            bank_details: Some(BankDetailsConfig {
                bank_name: "Example Bank".into(),
                account_name: "Settlement Ltd".into(),
                account_number: "0123456789".into(),
                routing_number: None,
            }),
            min_deposits: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_initialize_returns_static_details_with_reference() {
        let gw = BankTransferGateway::new(config()).unwrap();
        let resp = gw
            .initialize(&InitializeRequest {
                reference: "DEP-XYZ".into(),
                user_id: 7,
                user_email: "a@b.c".into(),
                amount: dec!(25),
                currency: Currency::new("EUR").unwrap(),
                existing_address: None,
            })
            .await
            .unwrap();
        match resp.instructions {
            PaymentInstructions::BankDetails {
                account_number,
                reference,
                ..
            } => {
                assert_eq!(account_number, "0123456789");
                assert_eq!(reference, "DEP-XYZ");
            }
            other => panic!("unexpected instructions {:?}", other),
        }
    }

    #[test]
    fn test_missing_bank_details_is_config_error() {
        let mut cfg = config();
        cfg.bank_details = None;
        assert!(BankTransferGateway::new(cfg).is_err());
    }

    #[test]
    fn test_webhook_mapping() {
        let gw = BankTransferGateway::new(config()).unwrap();
        let ev = gw
            .parse_webhook(br#"{"event":"transfer.received","data":{"reference":"DEP-1","session_id":"S9","amount":25,"currency":"EUR"}}"#)
            .unwrap();
        assert_eq!(ev.kind, WebhookEventKind::ChargeSucceeded);
        assert_eq!(ev.external_id.as_deref(), Some("S9"));
        assert_eq!(ev.amount, Some(dec!(25)));
    }
}
