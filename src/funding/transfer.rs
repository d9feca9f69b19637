//! User-to-user transfers in a single currency.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use super::error::FundingError;
use crate::commission::{CommissionCalculator, CommissionType};
use crate::core_types::{Currency, PlanTier, UserId, new_reference};
use crate::ledger::{
    DebitMode, Ledger, LedgerError, PairRequest, Transaction, TransactionMetadata, TxStatus, TxType,
};
use crate::money::validate_amount;

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from_user: UserId,
    pub to_user: UserId,
    pub plan: PlanTier,
    pub currency: Currency,
    /// Debited from the sender; the recipient gets this minus the fee
    pub amount: Decimal,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TransferResponse {
    pub reference: String,
    pub status: TxStatus,
    pub to_user: UserId,
    #[schema(value_type = String)]
    pub amount: Decimal,
    #[schema(value_type = String)]
    pub fee: Decimal,
    /// What the recipient received
    #[schema(value_type = String)]
    pub net_amount: Decimal,
    pub currency: Currency,
}

impl TransferResponse {
    fn from_out_leg(out: &Transaction, to_user: UserId) -> Self {
        Self {
            reference: out.reference.clone(),
            status: out.status,
            to_user,
            amount: out.gross_amount(),
            fee: out.fee,
            net_amount: out.amount,
            currency: out.currency.clone(),
        }
    }
}

pub struct TransferService {
    ledger: Arc<Ledger>,
    commission: Arc<CommissionCalculator>,
}

impl TransferService {
    pub fn new(ledger: Arc<Ledger>, commission: Arc<CommissionCalculator>) -> Self {
        Self { ledger, commission }
    }

    pub async fn execute(&self, req: TransferRequest) -> Result<TransferResponse, FundingError> {
        if req.from_user == req.to_user {
            return Err(FundingError::SelfTransfer);
        }
        let amount = validate_amount(req.amount, &req.currency)?;
        let store = self.ledger.store();

        let _key_guard = match &req.idempotency_key {
            Some(key) => Some(self.ledger.lock_idempotency_key(req.from_user, key).await),
            None => None,
        };
        if let Some(key) = &req.idempotency_key {
            if let Some(existing) = self.replay(&req, key).await? {
                return Ok(existing);
            }
        }

        let commission = self
            .commission
            .calculate_commission(CommissionType::Transfer, amount, &req.currency, req.plan)
            .await?;

        let sender = store
            .find_wallet(req.from_user, &req.currency)
            .await?
            .ok_or(FundingError::InsufficientFunds {
                available: Decimal::ZERO,
                required: amount,
            })?;
        if sender.available() < amount {
            return Err(FundingError::InsufficientFunds {
                available: sender.available(),
                required: amount,
            });
        }
        let recipient = store.get_or_create_wallet(req.to_user, &req.currency).await?;

        let reference = new_reference("TRF");
        let now = self.ledger.clock().now();
        let mut out_leg = Transaction::new_pending(
            sender.id,
            req.from_user,
            TxType::TransferOut,
            commission.net_amount,
            req.currency.clone(),
            commission.fee,
            reference.clone(),
            TransactionMetadata {
                plan: Some(req.plan),
                gross_amount: Some(amount),
                fee_rate: Some(commission.rate),
                counterparty_user_id: Some(req.to_user),
                ..Default::default()
            },
            now,
        );
        out_leg.idempotency_key = req.idempotency_key.clone();
        let in_leg = Transaction::new_pending(
            recipient.id,
            req.to_user,
            TxType::TransferIn,
            commission.net_amount,
            req.currency.clone(),
            Decimal::ZERO,
            reference,
            TransactionMetadata {
                counterparty_user_id: Some(req.from_user),
                ..Default::default()
            },
            now,
        );

        let settled = self
            .ledger
            .execute_pair(PairRequest {
                out_leg,
                in_leg,
                debit_amount: amount,
                credit_amount: commission.net_amount,
                debit_mode: DebitMode::HoldThenSettle,
                spread_revenue: Decimal::ZERO,
            })
            .await;
        let (out, _) = match (settled, &req.idempotency_key) {
            (Ok(legs), _) => legs,
            (Err(LedgerError::Duplicate(_)), Some(key)) => {
                // Another instance recorded the same key first
                return self
                    .replay(&req, key)
                    .await?
                    .ok_or_else(|| FundingError::IdempotencyConflict(key.clone()));
            }
            (Err(e), _) => return Err(e.into()),
        };

        Ok(TransferResponse::from_out_leg(&out, req.to_user))
    }

    async fn replay(&self, req: &TransferRequest, key: &str) -> Result<Option<TransferResponse>, FundingError> {
        match self.ledger.store().find_by_idempotency_key(req.from_user, key).await? {
            Some(tx) if tx.tx_type == TxType::TransferOut => {
                let to_user = tx.metadata.counterparty_user_id.unwrap_or(req.to_user);
                Ok(Some(TransferResponse::from_out_leg(&tx, to_user)))
            }
            Some(_) => Err(FundingError::IdempotencyConflict(key.to_string())),
            None => Ok(None),
        }
    }
}
