//! Withdrawals to an external destination.
//!
//! The gross amount is held before the provider is asked to pay out. The
//! hold is consumed by a `payout.success` webhook and released by a failure,
//! either synchronous or reported later.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::error::FundingError;
use crate::commission::{CommissionCalculator, CommissionType};
use crate::core_types::{Currency, PlanTier, UserId, new_reference};
use crate::ledger::{Ledger, Transaction, TransactionMetadata, TxStatus, TxType};
use crate::money::validate_amount;
use crate::providers::{GatewayRegistry, PaymentMethod, PayoutRequest};

#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub user_id: UserId,
    pub plan: PlanTier,
    pub method: PaymentMethod,
    pub currency: Currency,
    /// Gross amount leaving the wallet
    pub amount: Decimal,
    /// Bank account or chain address
    pub destination: String,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WithdrawResponse {
    pub reference: String,
    pub status: TxStatus,
    #[schema(value_type = String)]
    pub gross_amount: Decimal,
    #[schema(value_type = String)]
    pub fee: Decimal,
    /// What the destination receives
    #[schema(value_type = String)]
    pub net_amount: Decimal,
    pub currency: Currency,
}

impl WithdrawResponse {
    fn from_transaction(tx: &Transaction) -> Self {
        Self {
            reference: tx.reference.clone(),
            status: tx.status,
            gross_amount: tx.gross_amount(),
            fee: tx.fee,
            net_amount: tx.amount,
            currency: tx.currency.clone(),
        }
    }
}

pub struct WithdrawService {
    ledger: Arc<Ledger>,
    gateways: GatewayRegistry,
    commission: Arc<CommissionCalculator>,
}

impl WithdrawService {
    pub fn new(ledger: Arc<Ledger>, gateways: GatewayRegistry, commission: Arc<CommissionCalculator>) -> Self {
        Self {
            ledger,
            gateways,
            commission,
        }
    }

    pub async fn initiate(&self, req: WithdrawRequest) -> Result<WithdrawResponse, FundingError> {
        let amount = validate_amount(req.amount, &req.currency)?;
        if req.destination.trim().is_empty() {
            return Err(FundingError::InvalidDestination);
        }

        let store = self.ledger.store();
        if let Some(key) = &req.idempotency_key {
            match store.find_by_idempotency_key(req.user_id, key).await? {
                Some(tx) if tx.tx_type == TxType::Withdrawal => return Ok(WithdrawResponse::from_transaction(&tx)),
                Some(_) => return Err(FundingError::IdempotencyConflict(key.clone())),
                None => {}
            }
        }

        let gateway = self
            .gateways
            .by_method(req.method)
            .ok_or(FundingError::MethodUnavailable(req.method))?;
        if !gateway.supports_currency(&req.currency) {
            return Err(FundingError::UnsupportedCurrency(req.currency.to_string()));
        }

        let commission = self
            .commission
            .calculate_commission(CommissionType::Withdrawal, amount, &req.currency, req.plan)
            .await?;

        // A user without a wallet has nothing to withdraw
        let wallet = store
            .find_wallet(req.user_id, &req.currency)
            .await?
            .ok_or(FundingError::InsufficientFunds {
                available: Decimal::ZERO,
                required: amount,
            })?;
        if wallet.available() < amount {
            return Err(FundingError::InsufficientFunds {
                available: wallet.available(),
                required: amount,
            });
        }

        let mut tx = Transaction::new_pending(
            wallet.id,
            req.user_id,
            TxType::Withdrawal,
            commission.net_amount,
            req.currency.clone(),
            commission.fee,
            new_reference("WDR"),
            TransactionMetadata {
                plan: Some(req.plan),
                payment_method: Some(req.method),
                provider: Some(gateway.name().to_string()),
                gross_amount: Some(amount),
                fee_rate: Some(commission.rate),
                payout_destination: Some(req.destination.clone()),
                ..Default::default()
            },
            self.ledger.clock().now(),
        );
        tx.idempotency_key = req.idempotency_key.clone();

        // The hold is the authoritative funds check
        self.ledger.open_withdrawal(&tx).await?;

        let payout = gateway
            .initiate_payout(&PayoutRequest {
                reference: tx.reference.clone(),
                amount: commission.net_amount,
                currency: req.currency.clone(),
                destination: req.destination.clone(),
            })
            .await;

        match payout {
            Ok(resp) => {
                tx.metadata.provider_reference = Some(resp.external_reference);
                store.update_metadata(tx.id, &tx.metadata).await?;
                info!(
                    reference = %tx.reference,
                    user_id = req.user_id,
                    provider = gateway.name(),
                    gross = %amount,
                    fee = %commission.fee,
                    currency = %req.currency,
                    "Withdrawal submitted"
                );
                Ok(WithdrawResponse::from_transaction(&tx))
            }
            Err(e) => {
                warn!(reference = %tx.reference, provider = gateway.name(), error = %e, "Payout initiation failed");
                self.ledger
                    .reverse_withdrawal(&tx.reference, &format!("payout initiation failed: {}", e))
                    .await?;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::commission::MemoryCommissionStore;
    use crate::config::{BalanceStrategy, CommissionConfig};
    use crate::ledger::{LedgerStore, MemoryLedgerStore};
    use crate::notify::BroadcastNotifier;
    use crate::providers::MockGateway;
    use rust_decimal_macros::dec;

    struct Fixture {
        service: WithdrawService,
        ledger: Arc<Ledger>,
        store: Arc<MemoryLedgerStore>,
        bank: Arc<MockGateway>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryLedgerStore::default());
        let ledger = Arc::new(Ledger::new(
            store.clone(),
            BalanceStrategy::Atomic,
            Arc::new(BroadcastNotifier::default()),
            Arc::new(SystemClock),
        ));
        let bank = Arc::new(MockGateway::new("mockbank", PaymentMethod::BankTransfer, &["USD"]));
        let commission = Arc::new(CommissionCalculator::new(
            Arc::new(MemoryCommissionStore::new()),
            CommissionConfig::default(),
        ));
        Fixture {
            service: WithdrawService::new(ledger.clone(), GatewayRegistry::new().register(bank.clone()), commission),
            ledger,
            store,
            bank,
        }
    }

    fn usd() -> Currency {
        Currency::usd()
    }

    async fn fund(store: &MemoryLedgerStore, amount: Decimal) {
        let wallet = store.get_or_create_wallet(3, &usd()).await.unwrap();
        store.seed_balance(wallet.id, amount);
    }

    fn request(amount: Decimal) -> WithdrawRequest {
        WithdrawRequest {
            user_id: 3,
            plan: PlanTier::Free,
            method: PaymentMethod::BankTransfer,
            currency: usd(),
            amount,
            destination: "GB00-0000-1111".into(),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_withdrawal_holds_gross_and_pays_net() {
        let f = fixture();
        fund(&f.store, dec!(200)).await;

        let resp = f.service.initiate(request(dec!(100))).await.unwrap();
        assert_eq!(resp.fee, dec!(1));
        assert_eq!(resp.net_amount, dec!(99));
        assert_eq!(resp.status, TxStatus::Pending);

        let wallet = f.store.find_wallet(3, &usd()).await.unwrap().unwrap();
        assert_eq!(wallet.held, dec!(100));
        assert_eq!(wallet.available(), dec!(100));
        assert_eq!(f.bank.payout(&resp.reference).unwrap().amount, dec!(99));

        f.ledger.complete_withdrawal(&resp.reference, None).await.unwrap();
        let wallet = f.store.find_wallet(3, &usd()).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(100));
        assert_eq!(wallet.held, dec!(0));
    }

    #[tokio::test]
    async fn test_payout_failure_restores_balance() {
        let f = fixture();
        fund(&f.store, dec!(50)).await;
        f.bank.set_fail_payout(true);

        let err = f.service.initiate(request(dec!(50))).await.unwrap_err();
        assert!(matches!(err, FundingError::Gateway(_)));

        let wallet = f.store.find_wallet(3, &usd()).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(50));
        assert_eq!(wallet.held, dec!(0));
        let txs = f.store.list_transactions(3, 10).await.unwrap();
        assert_eq!(txs[0].status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn test_insufficient_funds_never_reaches_provider() {
        let f = fixture();
        fund(&f.store, dec!(10)).await;
        let err = f.service.initiate(request(dec!(10.01))).await.unwrap_err();
        assert!(matches!(err, FundingError::InsufficientFunds { .. }));
        assert!(f.bank.payout("anything").is_none());
        assert!(f.store.list_transactions(3, 10).await.unwrap().is_empty());

        let err = f.service.initiate(WithdrawRequest { user_id: 99, ..request(dec!(1)) }).await.unwrap_err();
        assert_eq!(err.http_status(), 422);
    }

    #[tokio::test]
    async fn test_unsupported_currency_and_destination() {
        let f = fixture();
        let mut req = request(dec!(5));
        req.currency = Currency::new("EUR").unwrap();
        assert!(matches!(
            f.service.initiate(req).await,
            Err(FundingError::UnsupportedCurrency(_))
        ));

        let mut req = request(dec!(5));
        req.destination = "  ".into();
        assert!(matches!(f.service.initiate(req).await, Err(FundingError::InvalidDestination)));
    }

    #[tokio::test]
    async fn test_idempotent_withdrawal() {
        let f = fixture();
        fund(&f.store, dec!(100)).await;
        let mut req = request(dec!(40));
        req.idempotency_key = Some("wd-1".into());
        let a = f.service.initiate(req.clone()).await.unwrap();
        let b = f.service.initiate(req).await.unwrap();
        assert_eq!(a.reference, b.reference);
        let wallet = f.store.find_wallet(3, &usd()).await.unwrap().unwrap();
        assert_eq!(wallet.held, dec!(40));
    }
}
