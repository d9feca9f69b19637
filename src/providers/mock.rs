//! In-process gateway for tests and `providers.mode: mock`.
//!
//! Remembers what it initialized so `verify` can echo it back, and can be
//! scripted to fail or to report a different provider-side state.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{
    GatewayError, InitializeRequest, InitializeResponse, PaymentGateway, PaymentInstructions,
    PaymentMethod, PayoutRequest, PayoutResponse, ProviderStatus, VerifyResult, WebhookEvent,
    WebhookEventKind, parse_event_envelope,
};
use crate::core_types::Currency;
use crate::webhook::signature::compute_signature;

pub struct MockGateway {
    name: String,
    method: PaymentMethod,
    currencies: Vec<Currency>,
    webhook_secret: String,
    min_deposit: Option<Decimal>,
    /// reference -> provider-side state
    charges: DashMap<String, VerifyResult>,
    payouts: DashMap<String, PayoutRequest>,
    fail_initialize: AtomicBool,
    fail_payout: AtomicBool,
    initialize_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new(name: &str, method: PaymentMethod, currencies: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            method,
            currencies: currencies.iter().filter_map(|c| Currency::new(c).ok()).collect(),
            webhook_secret: format!("{}-webhook-secret", name),
            min_deposit: None,
            charges: DashMap::new(),
            payouts: DashMap::new(),
            fail_initialize: AtomicBool::new(false),
            fail_payout: AtomicBool::new(false),
            initialize_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_webhook_secret(mut self, secret: &str) -> Self {
        self.webhook_secret = secret.to_string();
        self
    }

    pub fn with_min_deposit(mut self, min: Decimal) -> Self {
        self.min_deposit = Some(min);
        self
    }

    pub fn set_fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_payout(&self, fail: bool) {
        self.fail_payout.store(fail, Ordering::SeqCst);
    }

    /// Override what `verify` reports for a reference.
    pub fn set_verify_result(&self, reference: &str, result: VerifyResult) {
        self.charges.insert(reference.to_string(), result);
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn payout(&self, reference: &str) -> Option<PayoutRequest> {
        self.payouts.get(reference).map(|p| p.clone())
    }

    /// Hex HMAC-SHA256 of `body` under this gateway's webhook secret.
    pub fn sign(&self, body: &[u8]) -> String {
        compute_signature(&self.webhook_secret, body)
    }

    /// Build a webhook body in the mock's envelope format.
    pub fn event_body(event: &str, reference: &str, amount: Option<Decimal>, currency: Option<&str>) -> Vec<u8> {
        let mut data = json!({ "reference": reference, "id": format!("mock-{}", reference) });
        if let Some(a) = amount {
            data["amount"] = json!(a.to_string());
        }
        if let Some(c) = currency {
            data["currency"] = json!(c);
        }
        json!({ "event": event, "data": data }).to_string().into_bytes()
    }

    fn map_kind(event: &str) -> WebhookEventKind {
        match event {
            "charge.success" => WebhookEventKind::ChargeSucceeded,
            "charge.failed" => WebhookEventKind::ChargeFailed,
            "payout.success" => WebhookEventKind::PayoutSucceeded,
            "payout.failed" => WebhookEventKind::PayoutFailed,
            other => WebhookEventKind::Other(other.to_string()),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn method(&self) -> PaymentMethod {
        self.method
    }

    fn settlement_currencies(&self) -> &[Currency] {
        &self.currencies
    }

    fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }

    fn signature_header(&self) -> &str {
        "x-signature"
    }

    fn min_deposit(&self, _currency: &Currency) -> Option<Decimal> {
        self.min_deposit
    }

    async fn initialize(&self, req: &InitializeRequest) -> Result<InitializeResponse, GatewayError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(GatewayError::Http("mock provider offline".into()));
        }
        if !self.supports_currency(&req.currency) {
            return Err(GatewayError::UnsupportedCurrency(req.currency.to_string()));
        }

        self.charges.insert(
            req.reference.clone(),
            VerifyResult {
                status: ProviderStatus::Success,
                amount: req.amount,
                currency: req.currency.clone(),
            },
        );

        let instructions = match self.method {
            PaymentMethod::Card => PaymentInstructions::Redirect {
                url: format!("https://checkout.mock/{}", req.reference),
            },
            PaymentMethod::BankTransfer => PaymentInstructions::BankDetails {
                bank_name: "Mock Bank".into(),
                account_name: "Mock Settlement".into(),
                account_number: "0000000000".into(),
                routing_number: None,
                reference: req.reference.clone(),
            },
            PaymentMethod::Crypto => PaymentInstructions::CryptoAddress {
                address: req.existing_address.clone().unwrap_or_else(|| {
                    let hash = md5::compute(format!("{}_{}", req.currency, req.user_id));
                    format!("0x{:x}", hash)
                }),
                min_deposit: self.min_deposit.unwrap_or(Decimal::ZERO),
            },
        };

        Ok(InitializeResponse {
            external_reference: req.reference.clone(),
            instructions,
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifyResult, GatewayError> {
        if let Some(charge) = self.charges.get(reference) {
            return Ok(charge.clone());
        }
        if let Some(payout) = self.payouts.get(reference) {
            return Ok(VerifyResult {
                status: ProviderStatus::Success,
                amount: payout.amount,
                currency: payout.currency.clone(),
            });
        }
        Err(GatewayError::NotFound(reference.to_string()))
    }

    fn parse_webhook(&self, raw: &[u8]) -> Result<WebhookEvent, GatewayError> {
        parse_event_envelope(raw, "event", "reference", "id", Self::map_kind)
    }

    async fn initiate_payout(&self, req: &PayoutRequest) -> Result<PayoutResponse, GatewayError> {
        if self.fail_payout.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("mock payout declined".into()));
        }
        self.payouts.insert(req.reference.clone(), req.clone());
        Ok(PayoutResponse {
            external_reference: format!("{:x}", uuid::Uuid::new_v4().simple()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn req(reference: &str) -> InitializeRequest {
        InitializeRequest {
            reference: reference.into(),
            user_id: 42,
            user_email: "u@example.com".into(),
            amount: dec!(100),
            currency: Currency::new("USD").unwrap(),
            existing_address: None,
        }
    }

    #[tokio::test]
    async fn test_verify_echoes_initialized_charge() {
        let gw = MockGateway::new("mockcard", PaymentMethod::Card, &["USD"]);
        gw.initialize(&req("DEP-1")).await.unwrap();
        let v = gw.verify("DEP-1").await.unwrap();
        assert_eq!(v.status, ProviderStatus::Success);
        assert_eq!(v.amount, dec!(100));
        assert!(matches!(gw.verify("DEP-2").await, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let gw = MockGateway::new("mockcard", PaymentMethod::Card, &["USD"]);
        gw.set_fail_initialize(true);
        assert!(gw.initialize(&req("DEP-1")).await.is_err());
        assert_eq!(gw.initialize_calls(), 1);
    }

    #[test]
    fn test_signed_body_round_trips_through_parser() {
        let gw = MockGateway::new("mockcard", PaymentMethod::Card, &["USD"]);
        let body = MockGateway::event_body("charge.success", "DEP-9", Some(dec!(10)), Some("USD"));
        assert_eq!(gw.sign(&body).len(), 64);
        let ev = gw.parse_webhook(&body).unwrap();
        assert_eq!(ev.reference, "DEP-9");
        assert_eq!(ev.amount, Some(dec!(10)));
    }
}
