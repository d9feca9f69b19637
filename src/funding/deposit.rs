//! Deposit initiation.
//!
//! The PENDING row is written before the provider is contacted and is the
//! only record of an outstanding payment. A provider failure marks it FAILED
//! before the error is returned.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::error::FundingError;
use crate::commission::{CommissionCalculator, CommissionType};
use crate::core_types::{Currency, PlanTier, UserId, new_reference};
use crate::fx::FxRateService;
use crate::ledger::{
    DepositPurpose, Ledger, LedgerError, Transaction, TransactionMetadata, TxStatus, TxType,
};
use crate::money::{round_amount, validate_amount};
use crate::providers::{GatewayRegistry, InitializeRequest, PaymentInstructions, PaymentMethod};

/// Key in `metadata.extra` holding the instructions shown to the user.
const INSTRUCTIONS_KEY: &str = "instructions";

#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub user_id: UserId,
    pub user_email: String,
    pub plan: PlanTier,
    pub method: PaymentMethod,
    pub currency: Currency,
    /// Gross amount in `currency`, fee included
    pub amount: Decimal,
    pub idempotency_key: Option<String>,
    pub purpose: DepositPurpose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DepositResponse {
    pub reference: String,
    pub status: TxStatus,
    pub instructions: Option<PaymentInstructions>,
    /// Requested gross amount
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: Currency,
    #[schema(value_type = String)]
    pub fee: Decimal,
    /// What lands in the wallet
    #[schema(value_type = String)]
    pub net_amount: Decimal,
    /// Set when the provider charges in another currency
    #[schema(value_type = Option<String>)]
    pub charged_amount: Option<Decimal>,
    pub charged_currency: Option<Currency>,
    #[schema(value_type = Option<String>)]
    pub exchange_rate: Option<Decimal>,
}

impl DepositResponse {
    fn from_transaction(tx: &Transaction) -> Self {
        let instructions = tx
            .metadata
            .extra
            .get(INSTRUCTIONS_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        Self {
            reference: tx.reference.clone(),
            status: tx.status,
            instructions,
            amount: tx.amount + tx.fee,
            currency: tx.currency.clone(),
            fee: tx.fee,
            net_amount: tx.amount,
            charged_amount: tx.charged_amount,
            charged_currency: tx.charged_currency.clone(),
            exchange_rate: tx.exchange_rate,
        }
    }
}

/// What the client polls after a redirect.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TransactionStatus {
    pub reference: String,
    pub tx_type: TxType,
    pub status: TxStatus,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

pub struct DepositService {
    ledger: Arc<Ledger>,
    gateways: GatewayRegistry,
    commission: Arc<CommissionCalculator>,
    fx: Arc<FxRateService>,
}

impl DepositService {
    pub fn new(
        ledger: Arc<Ledger>,
        gateways: GatewayRegistry,
        commission: Arc<CommissionCalculator>,
        fx: Arc<FxRateService>,
    ) -> Self {
        Self {
            ledger,
            gateways,
            commission,
            fx,
        }
    }

    pub async fn initiate(&self, req: DepositRequest) -> Result<DepositResponse, FundingError> {
        let amount = validate_amount(req.amount, &req.currency)?;

        if let Some(key) = &req.idempotency_key {
            if let Some(existing) = self.replay(req.user_id, key).await? {
                return Ok(existing);
            }
        }

        let gateway = self
            .gateways
            .by_method(req.method)
            .ok_or(FundingError::MethodUnavailable(req.method))?;
        if req.method == PaymentMethod::Crypto && !gateway.supports_currency(&req.currency) {
            // Chains settle in their own asset; no conversion
            return Err(FundingError::UnsupportedCurrency(req.currency.to_string()));
        }
        let settlement = gateway
            .settlement_currency_for(&req.currency)
            .ok_or_else(|| FundingError::UnsupportedCurrency(req.currency.to_string()))?;

        let (charge_amount, exchange_rate) = if settlement == req.currency {
            (amount, None)
        } else {
            let rate = self.fx.get_rate(&req.currency, &settlement, true).await?;
            (round_amount(amount * rate, &settlement), Some(rate))
        };

        let commission = self
            .commission
            .calculate_commission(CommissionType::Deposit, amount, &req.currency, req.plan)
            .await?;

        let store = self.ledger.store();
        let wallet = store.get_or_create_wallet(req.user_id, &req.currency).await?;

        let mut tx = Transaction::new_pending(
            wallet.id,
            req.user_id,
            TxType::Deposit,
            commission.net_amount,
            req.currency.clone(),
            commission.fee,
            new_reference("DEP"),
            TransactionMetadata {
                plan: Some(req.plan),
                purpose: Some(req.purpose.clone()),
                payment_method: Some(req.method),
                provider: Some(gateway.name().to_string()),
                gross_amount: Some(amount),
                fee_rate: Some(commission.rate),
                ..Default::default()
            },
            self.ledger.clock().now(),
        );
        tx.idempotency_key = req.idempotency_key.clone();
        if exchange_rate.is_some() {
            tx.exchange_rate = exchange_rate;
            tx.charged_amount = Some(charge_amount);
            tx.charged_currency = Some(settlement.clone());
        }

        match self.ledger.record_pending(&tx).await {
            Ok(()) => {}
            Err(LedgerError::Duplicate(_)) if req.idempotency_key.is_some() => {
                // Lost a race with an identical request
                let key = req.idempotency_key.as_deref().unwrap_or_default();
                if let Some(existing) = self.replay(req.user_id, key).await? {
                    return Ok(existing);
                }
                return Err(FundingError::IdempotencyConflict(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        // Provider I/O happens with no lock held
        let init = gateway
            .initialize(&InitializeRequest {
                reference: tx.reference.clone(),
                user_id: req.user_id,
                user_email: req.user_email.clone(),
                amount: charge_amount,
                currency: settlement.clone(),
                existing_address: wallet.deposit_address.clone(),
            })
            .await;

        let init = match init {
            Ok(init) => init,
            Err(e) => {
                warn!(reference = %tx.reference, provider = gateway.name(), error = %e, "Provider initialization failed");
                if let Err(fail_err) = self
                    .ledger
                    .fail_deposit(&tx.reference, &format!("provider initialization failed: {}", e))
                    .await
                {
                    warn!(reference = %tx.reference, error = %fail_err, "Could not fail deposit after provider error");
                }
                return Err(e.into());
            }
        };

        let mut instructions = init.instructions;
        if let PaymentInstructions::CryptoAddress { address, .. } = &mut instructions {
            // First writer wins so one wallet keeps one address
            *address = store.set_deposit_address(wallet.id, address).await?;
        }

        tx.metadata.provider_reference = Some(init.external_reference);
        if let Ok(value) = serde_json::to_value(&instructions) {
            tx.metadata.extra.insert(INSTRUCTIONS_KEY.to_string(), value);
        }
        store.update_metadata(tx.id, &tx.metadata).await?;

        info!(
            reference = %tx.reference,
            user_id = req.user_id,
            provider = gateway.name(),
            amount = %amount,
            currency = %req.currency,
            fee = %commission.fee,
            charged = %charge_amount,
            charged_currency = %settlement,
            "Deposit initiated"
        );

        let mut response = DepositResponse::from_transaction(&tx);
        response.instructions = Some(instructions);
        Ok(response)
    }

    async fn replay(&self, user_id: UserId, key: &str) -> Result<Option<DepositResponse>, FundingError> {
        match self.ledger.store().find_by_idempotency_key(user_id, key).await? {
            Some(tx) if tx.tx_type == TxType::Deposit => Ok(Some(DepositResponse::from_transaction(&tx))),
            Some(_) => Err(FundingError::IdempotencyConflict(key.to_string())),
            None => Ok(None),
        }
    }

    /// Status of any of the user's transactions by reference.
    pub async fn status(&self, user_id: UserId, reference: &str) -> Result<TransactionStatus, FundingError> {
        let store = self.ledger.store();
        let mut legs = store.find_by_reference(reference).await?;
        if legs.is_empty() {
            if let Some(tx) = store.find_by_external_reference(reference).await? {
                legs.push(tx);
            }
        }
        let tx = legs
            .into_iter()
            .find(|tx| tx.user_id == user_id)
            .ok_or_else(|| FundingError::NotFound(reference.to_string()))?;
        Ok(TransactionStatus {
            reference: tx.reference,
            tx_type: tx.tx_type,
            status: tx.status,
            amount: tx.amount,
            currency: tx.currency,
            failure_reason: tx.metadata.failure_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::commission::MemoryCommissionStore;
    use crate::config::{BalanceStrategy, CommissionConfig, FxConfig};
    use crate::fx::InMemoryRateCache;
    use crate::ledger::{LedgerStore, MemoryLedgerStore};
    use crate::notify::BroadcastNotifier;
    use crate::providers::MockGateway;
    use rust_decimal_macros::dec;

    struct Fixture {
        service: DepositService,
        store: Arc<MemoryLedgerStore>,
        card: Arc<MockGateway>,
        crypto: Arc<MockGateway>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryLedgerStore::default());
        let clock = Arc::new(SystemClock);
        let ledger = Arc::new(Ledger::new(
            store.clone(),
            BalanceStrategy::Atomic,
            Arc::new(BroadcastNotifier::default()),
            clock.clone(),
        ));
        let card = Arc::new(MockGateway::new("mockcard", PaymentMethod::Card, &["USD"]));
        let crypto = Arc::new(
            MockGateway::new("mockchain", PaymentMethod::Crypto, &["BTC", "USDT"]).with_min_deposit(dec!(0.0001)),
        );
        let gateways = GatewayRegistry::new().register(card.clone()).register(crypto.clone());
        let commission = Arc::new(CommissionCalculator::new(
            Arc::new(MemoryCommissionStore::new()),
            CommissionConfig::default(),
        ));
        // no live sources: EUR->USD comes from the fallback table
        let fx = Arc::new(FxRateService::new(
            FxConfig::default(),
            Arc::new(InMemoryRateCache::new()),
            clock,
        ));
        Fixture {
            service: DepositService::new(ledger, gateways, commission, fx),
            store,
            card,
            crypto,
        }
    }

    fn request(currency: &str, amount: Decimal, method: PaymentMethod) -> DepositRequest {
        DepositRequest {
            user_id: 5,
            user_email: "five@example.com".into(),
            plan: PlanTier::Free,
            method,
            currency: Currency::new(currency).unwrap(),
            amount,
            idempotency_key: None,
            purpose: DepositPurpose::WalletFunding,
        }
    }

    #[tokio::test]
    async fn test_card_deposit_creates_pending_with_fee() {
        let f = fixture();
        let resp = f.service.initiate(request("USD", dec!(100), PaymentMethod::Card)).await.unwrap();
        assert_eq!(resp.fee, dec!(7));
        assert_eq!(resp.net_amount, dec!(93));
        assert_eq!(resp.status, TxStatus::Pending);
        assert!(matches!(resp.instructions, Some(PaymentInstructions::Redirect { .. })));

        let legs = f.store.find_by_reference(&resp.reference).await.unwrap();
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].metadata.gross_amount, Some(dec!(100)));
        assert_eq!(legs[0].metadata.provider.as_deref(), Some("mockcard"));
        assert!(legs[0].metadata.extra.contains_key(INSTRUCTIONS_KEY));
    }

    #[tokio::test]
    async fn test_cross_currency_charge_uses_buffered_rate() {
        let f = fixture();
        let resp = f.service.initiate(request("EUR", dec!(100), PaymentMethod::Card)).await.unwrap();
        assert_eq!(resp.charged_currency, Some(Currency::usd()));
        let rate = resp.exchange_rate.unwrap();
        assert_eq!(resp.charged_amount, Some(round_amount(dec!(100) * rate, &Currency::usd())));

        // buffer is applied on top of the unbuffered rate
        let fx = FxRateService::new(FxConfig::default(), Arc::new(InMemoryRateCache::new()), Arc::new(SystemClock));
        let raw = fx.get_rate(&Currency::new("EUR").unwrap(), &Currency::usd(), false).await.unwrap();
        assert!(rate > raw);
    }

    #[tokio::test]
    async fn test_provider_failure_marks_failed() {
        let f = fixture();
        f.card.set_fail_initialize(true);
        let err = f.service.initiate(request("USD", dec!(50), PaymentMethod::Card)).await.unwrap_err();
        assert!(matches!(err, FundingError::Gateway(_)));

        let txs = f.store.list_transactions(5, 10).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn test_idempotency_key_returns_original() {
        let f = fixture();
        let mut req = request("USD", dec!(20), PaymentMethod::Card);
        req.idempotency_key = Some("dep-abc".into());
        let first = f.service.initiate(req.clone()).await.unwrap();
        let second = f.service.initiate(req).await.unwrap();
        assert_eq!(first.reference, second.reference);
        assert_eq!(second.instructions, first.instructions);
        assert_eq!(f.card.initialize_calls(), 1);
    }

    #[tokio::test]
    async fn test_crypto_address_reused() {
        let f = fixture();
        let a = f.service.initiate(request("BTC", dec!(0.01), PaymentMethod::Crypto)).await.unwrap();
        let b = f.service.initiate(request("BTC", dec!(0.02), PaymentMethod::Crypto)).await.unwrap();
        let addr = |r: &DepositResponse| match &r.instructions {
            Some(PaymentInstructions::CryptoAddress { address, .. }) => address.clone(),
            other => panic!("unexpected instructions {:?}", other),
        };
        assert_eq!(addr(&a), addr(&b));
        let wallet = f.store.find_wallet(5, &Currency::new("BTC").unwrap()).await.unwrap().unwrap();
        assert_eq!(wallet.deposit_address, Some(addr(&a)));
        assert_eq!(f.crypto.initialize_calls(), 2);
    }

    #[tokio::test]
    async fn test_crypto_rejects_fiat() {
        let f = fixture();
        let err = f
            .service
            .initiate(request("USD", dec!(10), PaymentMethod::Crypto))
            .await
            .unwrap_err();
        assert!(matches!(err, FundingError::UnsupportedCurrency(_)));
        assert!(f.store.list_transactions(5, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_creates_nothing() {
        let f = fixture();
        for amount in [dec!(0), dec!(-5), dec!(1.001)] {
            let err = f
                .service
                .initiate(request("USD", amount, PaymentMethod::Card))
                .await
                .unwrap_err();
            assert_eq!(err.http_status(), 400);
        }
        assert!(f.store.list_transactions(5, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_is_scoped_to_owner() {
        let f = fixture();
        let resp = f.service.initiate(request("USD", dec!(10), PaymentMethod::Card)).await.unwrap();
        let status = f.service.status(5, &resp.reference).await.unwrap();
        assert_eq!(status.status, TxStatus::Pending);
        assert_eq!(status.amount, dec!(9.30));
        assert!(matches!(
            f.service.status(6, &resp.reference).await,
            Err(FundingError::NotFound(_))
        ));
    }
}
