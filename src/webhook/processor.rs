use axum::http::HeaderMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::WebhookError;
use super::signature::verify_signature;
use crate::config::ProvidersConfig;
use crate::ledger::{DepositPurpose, FailOutcome, Ledger, LedgerError, SettlementOutcome, Transaction, TxType};
use crate::providers::{GatewayRegistry, PaymentGateway, ProviderStatus, WebhookEvent, WebhookEventKind};

/// Result of an accepted webhook. Always acknowledged with 200.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Settled { reference: String },
    Failed { reference: String },
    /// Already terminal; nothing reprocessed
    Duplicate { reference: String },
    /// Event type we do not act on
    Ignored { event: String },
    /// Provider did not confirm the claimed state
    Unverified { reference: String },
    /// Settlement hit an internal error; flagged for manual handling
    ReconciliationRequired { reference: String },
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Settled { .. } => "settled",
            WebhookOutcome::Failed { .. } => "failed",
            WebhookOutcome::Duplicate { .. } => "duplicate",
            WebhookOutcome::Ignored { .. } => "ignored",
            WebhookOutcome::Unverified { .. } => "unverified",
            WebhookOutcome::ReconciliationRequired { .. } => "reconciliation_required",
        }
    }
}

pub struct WebhookProcessor {
    gateways: GatewayRegistry,
    ledger: Arc<Ledger>,
    test_reference_prefix: String,
    reverify: bool,
}

impl WebhookProcessor {
    pub fn new(gateways: GatewayRegistry, ledger: Arc<Ledger>, config: &ProvidersConfig) -> Self {
        Self {
            gateways,
            ledger,
            test_reference_prefix: config.test_reference_prefix.clone(),
            reverify: config.reverify_webhooks,
        }
    }

    /// Process one delivery from `provider`. `raw_body` must be the exact
    /// bytes received; the signature covers them, not a re-serialization.
    pub async fn handle_webhook(
        &self,
        provider: &str,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> Result<WebhookOutcome, WebhookError> {
        let gateway = self
            .gateways
            .by_name(provider)
            .ok_or_else(|| WebhookError::UnknownProvider(provider.to_string()))?;

        // 1. Signature
        let signature = headers
            .get(gateway.signature_header())
            .and_then(|v| v.to_str().ok());
        if let Err(e) = verify_signature(gateway.webhook_secret(), raw_body, signature) {
            warn!(security = true, %provider, reason = ?e, "Webhook signature rejected");
            return Err(e.into());
        }

        let event = gateway.parse_webhook(raw_body).map_err(|e| {
            warn!(%provider, error = %e, "Unparseable webhook payload");
            WebhookError::InvalidPayload(e.to_string())
        })?;

        // 2. Event filter
        if let WebhookEventKind::Other(name) = &event.kind {
            debug!(%provider, event = %name, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored { event: name.clone() });
        }

        // 3. Independent confirmation for events that move money in
        if event.kind == WebhookEventKind::ChargeSucceeded && self.should_reverify(&event.reference) {
            match gateway.verify(&event.reference).await {
                Ok(v) if v.status == ProviderStatus::Success => {}
                Ok(v) => {
                    warn!(
                        security = true,
                        %provider,
                        reference = %event.reference,
                        status = ?v.status,
                        "Provider did not confirm webhook claim"
                    );
                    return Ok(WebhookOutcome::Unverified {
                        reference: event.reference,
                    });
                }
                Err(e) => {
                    // Provider says paid but cannot be asked; a human decides
                    return Ok(self
                        .escalate(&event.reference, &format!("re-verification unavailable: {}", e))
                        .await);
                }
            }
        }

        // 4. Idempotency
        let tx_type = match event.kind {
            WebhookEventKind::PayoutSucceeded | WebhookEventKind::PayoutFailed => TxType::Withdrawal,
            _ => TxType::Deposit,
        };
        let tx = match self.ledger.find_single(&event.reference, tx_type).await {
            Ok(tx) => tx,
            Err(LedgerError::TransactionNotFound(_)) => {
                warn!(%provider, reference = %event.reference, "Webhook for unknown reference");
                return Ok(WebhookOutcome::Ignored {
                    event: format!("unknown reference {}", event.reference),
                });
            }
            Err(e) => return Ok(self.escalate(&event.reference, &e.to_string()).await),
        };
        if tx.status.is_terminal() && self.is_replay(&tx, &event.kind) {
            debug!(reference = %tx.reference, status = %tx.status, "Duplicate webhook delivery");
            return Ok(WebhookOutcome::Duplicate { reference: tx.reference });
        }

        // 5. Dispatch
        let result = match &event.kind {
            WebhookEventKind::ChargeSucceeded => self.settle_charge(gateway.as_ref(), &tx, &event).await,
            WebhookEventKind::ChargeFailed => {
                let reason = event.reason.as_deref().unwrap_or("provider reported failure");
                self.ledger.fail_deposit(&tx.reference, reason).await.map(fail_outcome)
            }
            WebhookEventKind::PayoutSucceeded => self
                .ledger
                .complete_withdrawal(&tx.reference, event.external_id.as_deref())
                .await
                .map(settle_outcome),
            WebhookEventKind::PayoutFailed => {
                let reason = event.reason.as_deref().unwrap_or("payout rejected");
                self.ledger.reverse_withdrawal(&tx.reference, reason).await.map(fail_outcome)
            }
            WebhookEventKind::Other(name) => Ok(WebhookOutcome::Ignored { event: name.clone() }),
        };

        match result {
            Ok(outcome) => {
                info!(%provider, reference = %tx.reference, outcome = outcome.as_str(), "Webhook processed");
                Ok(outcome)
            }
            Err(LedgerError::Duplicate(external_id)) => {
                warn!(%provider, reference = %tx.reference, %external_id, "Delivery already counted under its provider id");
                Ok(WebhookOutcome::Duplicate { reference: tx.reference })
            }
            Err(e) => Ok(self.escalate(&tx.reference, &e.to_string()).await),
        }
    }

    fn should_reverify(&self, reference: &str) -> bool {
        self.reverify && !reference.starts_with(&self.test_reference_prefix)
    }

    /// A terminal transaction receiving the event that made it terminal.
    fn is_replay(&self, tx: &Transaction, kind: &WebhookEventKind) -> bool {
        use crate::ledger::TxStatus::{Completed, Failed};
        matches!(
            (tx.status, kind),
            (Completed, WebhookEventKind::ChargeSucceeded | WebhookEventKind::PayoutSucceeded)
                | (Failed, WebhookEventKind::ChargeFailed | WebhookEventKind::PayoutFailed)
        )
    }

    async fn settle_charge(
        &self,
        gateway: &dyn PaymentGateway,
        tx: &Transaction,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, LedgerError> {
        if let Some(reason) = self.amount_problem(gateway, tx, event) {
            warn!(reference = %tx.reference, %reason, "Deposit amount rejected");
            return self.ledger.fail_deposit(&tx.reference, &reason).await.map(fail_outcome);
        }

        let outcome = self
            .ledger
            .confirm_deposit(&tx.reference, event.external_id.as_deref())
            .await?;
        if let Some(DepositPurpose::FeaturePayment { feature }) = &tx.metadata.purpose {
            info!(reference = %tx.reference, user_id = tx.user_id, %feature, "Feature payment confirmed");
        }
        if let (SettlementOutcome::Settled(_), Some(received)) = (&outcome, event.amount) {
            self.flag_surplus(tx, received).await;
        }
        Ok(settle_outcome(outcome))
    }

    /// Crypto deposits report what actually arrived; anything short of the
    /// provider minimum or of what we asked for is refused.
    fn amount_problem(&self, gateway: &dyn PaymentGateway, tx: &Transaction, event: &WebhookEvent) -> Option<String> {
        let received = event.amount?;
        let currency = tx.charged_currency.as_ref().unwrap_or(&tx.currency);
        if let Some(min) = gateway.min_deposit(currency) {
            if received < min {
                return Some(format!("below minimum deposit {} {}", min, currency));
            }
        }
        let expected = expected_charge(tx);
        if received < expected && expected > Decimal::ZERO {
            return Some(format!("amount mismatch: received {} expected {}", received, expected));
        }
        None
    }

    /// The wallet is credited what was quoted. Anything that arrived on top
    /// is left for a human to return or credit.
    async fn flag_surplus(&self, tx: &Transaction, received: Decimal) {
        let expected = expected_charge(tx);
        if received <= expected {
            return;
        }
        let currency = tx.charged_currency.as_ref().unwrap_or(&tx.currency);
        let note = format!(
            "overpaid: received {} expected {} {} (surplus {})",
            received,
            expected,
            currency,
            received - expected
        );
        error!(reference = %tx.reference, reconciliation = true, %received, %expected, "Deposit overpaid");
        if let Err(e) = self.ledger.flag_reconciliation(&tx.reference, &note).await {
            error!(reference = %tx.reference, error = %e, "Could not flag overpaid deposit");
        }
    }

    async fn escalate(&self, reference: &str, cause: &str) -> WebhookOutcome {
        error!(%reference, reconciliation = true, %cause, "Webhook settlement failed");
        match self.ledger.flag_reconciliation(reference, cause).await {
            Ok(0) => warn!(%reference, "Nothing to flag for reconciliation"),
            Ok(_) => {}
            Err(e) => error!(%reference, error = %e, "Could not flag transaction for reconciliation"),
        }
        WebhookOutcome::ReconciliationRequired {
            reference: reference.to_string(),
        }
    }
}

/// What the provider was asked to collect, in the charged currency.
fn expected_charge(tx: &Transaction) -> Decimal {
    tx.charged_amount.unwrap_or_else(|| tx.amount + tx.fee)
}

fn settle_outcome(outcome: SettlementOutcome) -> WebhookOutcome {
    match outcome {
        SettlementOutcome::Settled(tx) => WebhookOutcome::Settled { reference: tx.reference },
        SettlementOutcome::AlreadySettled(tx) => WebhookOutcome::Duplicate { reference: tx.reference },
    }
}

fn fail_outcome(outcome: FailOutcome) -> WebhookOutcome {
    match outcome {
        FailOutcome::Failed(tx) => WebhookOutcome::Failed { reference: tx.reference },
        FailOutcome::AlreadyFailed(tx) => WebhookOutcome::Duplicate { reference: tx.reference },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::BalanceStrategy;
    use crate::core_types::{Currency, new_reference};
    use crate::ledger::{LedgerStore, MemoryLedgerStore, TransactionMetadata, TxStatus};
    use crate::notify::BroadcastNotifier;
    use crate::providers::{MockGateway, PaymentMethod, VerifyResult};
    use axum::http::HeaderValue;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct Fixture {
        processor: WebhookProcessor,
        store: Arc<MemoryLedgerStore>,
        ledger: Arc<Ledger>,
        gateway: Arc<MockGateway>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryLedgerStore::default());
        let ledger = Arc::new(Ledger::new(
            store.clone(),
            BalanceStrategy::Atomic,
            Arc::new(BroadcastNotifier::default()),
            Arc::new(SystemClock),
        ));
        let gateway = Arc::new(MockGateway::new("mockcard", PaymentMethod::Card, &["USD"]));
        let registry = GatewayRegistry::new().register(gateway.clone());
        let processor = WebhookProcessor::new(registry, ledger.clone(), &ProvidersConfig::default());
        Fixture {
            processor,
            store,
            ledger,
            gateway,
        }
    }

    async fn pending_deposit(f: &Fixture, reference: &str, metadata: TransactionMetadata) -> Transaction {
        let wallet = f.store.get_or_create_wallet(7, &Currency::usd()).await.unwrap();
        let tx = Transaction::new_pending(
            wallet.id,
            7,
            TxType::Deposit,
            dec!(93),
            Currency::usd(),
            dec!(7),
            reference.to_string(),
            metadata,
            Utc::now(),
        );
        f.ledger.record_pending(&tx).await.unwrap();
        tx
    }

    fn signed(f: &Fixture, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-signature", HeaderValue::from_str(&f.gateway.sign(body)).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_duplicate_delivery_settles_once() {
        let f = fixture();
        let tx = pending_deposit(&f, "TEST-dup", TransactionMetadata::default()).await;
        let body = MockGateway::event_body("charge.success", "TEST-dup", None, None);
        let headers = signed(&f, &body);

        let first = f.processor.handle_webhook("mockcard", &headers, &body).await.unwrap();
        assert_eq!(first.as_str(), "settled");
        for _ in 0..4 {
            let again = f.processor.handle_webhook("mockcard", &headers, &body).await.unwrap();
            assert_eq!(again.as_str(), "duplicate");
        }
        assert_eq!(f.store.read_balance(tx.wallet_id).await.unwrap(), dec!(93));
    }

    #[tokio::test]
    async fn test_bad_signature_touches_nothing() {
        let f = fixture();
        let tx = pending_deposit(&f, "TEST-sig", TransactionMetadata::default()).await;
        let body = MockGateway::event_body("charge.success", "TEST-sig", None, None);

        let err = f
            .processor
            .handle_webhook("mockcard", &HeaderMap::new(), &body)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 401);

        let mut forged = HeaderMap::new();
        forged.insert("x-signature", HeaderValue::from_static("deadbeef"));
        let err = f.processor.handle_webhook("mockcard", &forged, &body).await.unwrap_err();
        assert_eq!(err, WebhookError::InvalidSignature);

        let stored = f.store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_provider_and_ignored_event() {
        let f = fixture();
        let body = MockGateway::event_body("customer.created", "X", None, None);
        let err = f
            .processor
            .handle_webhook("nope", &signed(&f, &body), &body)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);

        let out = f
            .processor
            .handle_webhook("mockcard", &signed(&f, &body), &body)
            .await
            .unwrap();
        assert_eq!(out, WebhookOutcome::Ignored { event: "customer.created".into() });
    }

    #[tokio::test]
    async fn test_reverification_blocks_unconfirmed_charge() {
        let f = fixture();
        let reference = new_reference("DEP");
        let tx = pending_deposit(&f, &reference, TransactionMetadata::default()).await;
        f.gateway.set_verify_result(
            &reference,
            VerifyResult {
                status: ProviderStatus::Pending,
                amount: dec!(100),
                currency: Currency::usd(),
            },
        );
        let body = MockGateway::event_body("charge.success", &reference, None, None);
        let out = f
            .processor
            .handle_webhook("mockcard", &signed(&f, &body), &body)
            .await
            .unwrap();
        assert_eq!(out.as_str(), "unverified");
        assert_eq!(f.store.read_balance(tx.wallet_id).await.unwrap(), Decimal::ZERO);

        f.gateway.set_verify_result(
            &reference,
            VerifyResult {
                status: ProviderStatus::Success,
                amount: dec!(100),
                currency: Currency::usd(),
            },
        );
        let out = f
            .processor
            .handle_webhook("mockcard", &signed(&f, &body), &body)
            .await
            .unwrap();
        assert_eq!(out.as_str(), "settled");
    }

    #[tokio::test]
    async fn test_short_payment_fails_deposit() {
        let f = fixture();
        let tx = pending_deposit(&f, "TEST-short", TransactionMetadata::default()).await;
        let body = MockGateway::event_body("charge.success", "TEST-short", Some(dec!(40)), Some("USD"));
        let out = f
            .processor
            .handle_webhook("mockcard", &signed(&f, &body), &body)
            .await
            .unwrap();
        assert_eq!(out.as_str(), "failed");
        let stored = f.store.get_transaction(tx.id).await.unwrap().unwrap();
        assert!(stored.metadata.failure_reason.unwrap().starts_with("amount mismatch"));
    }

    #[tokio::test]
    async fn test_overpayment_settles_quoted_amount_and_flags_surplus() {
        let f = fixture();
        let tx = pending_deposit(&f, "TEST-over", TransactionMetadata::default()).await;
        let body = MockGateway::event_body("charge.success", "TEST-over", Some(dec!(130)), Some("USD"));
        let out = f
            .processor
            .handle_webhook("mockcard", &signed(&f, &body), &body)
            .await
            .unwrap();
        assert_eq!(out.as_str(), "settled");

        assert_eq!(f.store.read_balance(tx.wallet_id).await.unwrap(), dec!(93));
        let stored = f.store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Completed);
        assert!(stored.metadata.needs_reconciliation);
        assert!(stored.metadata.reconciliation_note.unwrap().contains("surplus 30"));
    }

    #[tokio::test]
    async fn test_exact_payment_is_not_flagged() {
        let f = fixture();
        let tx = pending_deposit(&f, "TEST-exact", TransactionMetadata::default()).await;
        let body = MockGateway::event_body("charge.success", "TEST-exact", Some(dec!(100)), Some("USD"));
        f.processor
            .handle_webhook("mockcard", &signed(&f, &body), &body)
            .await
            .unwrap();
        let stored = f.store.get_transaction(tx.id).await.unwrap().unwrap();
        assert!(!stored.metadata.needs_reconciliation);
    }

    #[tokio::test]
    async fn test_reused_charge_id_credits_once() {
        let f = fixture();
        let first = pending_deposit(&f, "TEST-ch1", TransactionMetadata::default()).await;
        let second = pending_deposit(&f, "TEST-ch2", TransactionMetadata::default()).await;

        let mut outcomes = Vec::new();
        for reference in ["TEST-ch1", "TEST-ch2"] {
            let body = serde_json::json!({
                "event": "charge.success",
                "data": { "reference": reference, "id": "ch_same_provider_id" }
            })
            .to_string()
            .into_bytes();
            let out = f
                .processor
                .handle_webhook("mockcard", &signed(&f, &body), &body)
                .await
                .unwrap();
            outcomes.push(out);
        }
        assert_eq!(outcomes[0].as_str(), "settled");
        assert_eq!(outcomes[1], WebhookOutcome::Duplicate { reference: "TEST-ch2".into() });

        // one wallet holds both deposits
        assert_eq!(f.store.read_balance(first.wallet_id).await.unwrap(), dec!(93));
        let stored = f.store.get_transaction(first.id).await.unwrap().unwrap();
        assert_eq!(stored.external_reference.as_deref(), Some("ch_same_provider_id"));
        let stored = f.store.get_transaction(second.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Pending);
        assert_eq!(stored.external_reference, None);
    }

    #[tokio::test]
    async fn test_success_after_failure_needs_reconciliation() {
        let f = fixture();
        let tx = pending_deposit(&f, "TEST-late", TransactionMetadata::default()).await;
        f.ledger.fail_deposit("TEST-late", "expired").await.unwrap();

        let body = MockGateway::event_body("charge.success", "TEST-late", None, None);
        let out = f
            .processor
            .handle_webhook("mockcard", &signed(&f, &body), &body)
            .await
            .unwrap();
        assert_eq!(out.as_str(), "reconciliation_required");

        let stored = f.store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Failed);
        assert!(stored.metadata.needs_reconciliation);
        assert_eq!(f.store.read_balance(tx.wallet_id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_charge_failed_event() {
        let f = fixture();
        let tx = pending_deposit(&f, "TEST-fail", TransactionMetadata::default()).await;
        let body = MockGateway::event_body("charge.failed", "TEST-fail", None, None);
        let out = f
            .processor
            .handle_webhook("mockcard", &signed(&f, &body), &body)
            .await
            .unwrap();
        assert_eq!(out.as_str(), "failed");
        let again = f
            .processor
            .handle_webhook("mockcard", &signed(&f, &body), &body)
            .await
            .unwrap();
        assert_eq!(again.as_str(), "duplicate");
        let stored = f.store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn test_feature_payment_completes_without_credit() {
        let f = fixture();
        let metadata = TransactionMetadata {
            purpose: Some(DepositPurpose::FeaturePayment {
                feature: "pin_note".into(),
            }),
            ..Default::default()
        };
        let tx = pending_deposit(&f, "TEST-feat", metadata).await;
        let body = MockGateway::event_body("charge.success", "TEST-feat", None, None);
        let out = f
            .processor
            .handle_webhook("mockcard", &signed(&f, &body), &body)
            .await
            .unwrap();
        assert_eq!(out.as_str(), "settled");
        assert_eq!(f.store.read_balance(tx.wallet_id).await.unwrap(), Decimal::ZERO);
    }
}
