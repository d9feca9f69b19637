use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::ToSchema;

use super::SwapError;
use super::quote::{LockLookup, QuoteBook, SwapQuote};
use crate::commission::{CommissionCalculator, CommissionType, SpreadSide};
use crate::core_types::{Currency, PlanTier, UserId, new_reference};
use crate::fx::FxRateService;
use crate::ledger::{DebitMode, Ledger, LedgerError, PairRequest, Transaction, TransactionMetadata, TxType};
use crate::money::{round_amount, round_rate, validate_amount};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SwapResult {
    pub reference: String,
    #[schema(value_type = String)]
    pub amount_in: Decimal,
    #[schema(value_type = String)]
    pub amount_out: Decimal,
    #[schema(value_type = String)]
    pub fee: Decimal,
    #[schema(value_type = String)]
    pub rate: Decimal,
    pub from_currency: Currency,
    pub to_currency: Currency,
}

impl SwapResult {
    fn from_legs(out: &Transaction, inn: &Transaction) -> Self {
        Self {
            reference: out.reference.clone(),
            amount_in: out.gross_amount(),
            amount_out: inn.amount,
            fee: out.fee,
            rate: inn.exchange_rate.unwrap_or_default(),
            from_currency: out.currency.clone(),
            to_currency: inn.currency.clone(),
        }
    }
}

pub struct SwapEngine {
    fx: Arc<FxRateService>,
    commission: Arc<CommissionCalculator>,
    ledger: Arc<Ledger>,
    quotes: QuoteBook,
}

impl SwapEngine {
    pub fn new(
        fx: Arc<FxRateService>,
        commission: Arc<CommissionCalculator>,
        ledger: Arc<Ledger>,
        quote_ttl_secs: i64,
    ) -> Self {
        let quotes = QuoteBook::new(quote_ttl_secs, ledger.clock().clone());
        Self {
            fx,
            commission,
            ledger,
            quotes,
        }
    }

    pub fn quotes(&self) -> &QuoteBook {
        &self.quotes
    }

    /// Price a swap and lock the price for a short while.
    pub async fn preview(
        &self,
        user_id: UserId,
        plan: PlanTier,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
    ) -> Result<SwapQuote, SwapError> {
        let quote = self.price(user_id, plan, from, to, amount).await?;
        self.quotes.insert(quote.clone());
        debug!(lock_id = %quote.lock_id, %from, %to, rate = %quote.rate, "Swap quote locked");
        Ok(quote)
    }

    /// Debit `amount` of `from` and credit the converted amount of `to`.
    ///
    /// An unexpired `lock_id` fixes the price; an expired or unknown one
    /// re-prices at the current rate.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        user_id: UserId,
        plan: PlanTier,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
        lock_id: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<SwapResult, SwapError> {
        let _key_guard = match idempotency_key {
            Some(key) => Some(self.ledger.lock_idempotency_key(user_id, key).await),
            None => None,
        };
        if let Some(key) = idempotency_key {
            if let Some(existing) = self.replay(user_id, key).await? {
                return Ok(existing);
            }
        }

        let amount = validate_amount(amount, from).map_err(|e| SwapError::InvalidAmount(e.to_string()))?;
        let quote = match lock_id.map(|id| (id, self.quotes.take(id))) {
            Some((_, LockLookup::Valid(q))) => {
                if !q.matches(user_id, from, to, amount) {
                    self.quotes.restore(q);
                    return Err(SwapError::QuoteMismatch);
                }
                q
            }
            Some((id, lookup)) => {
                info!(lock_id = %id, expired = matches!(lookup, LockLookup::Expired), "Quote lock unusable, re-pricing");
                self.price(user_id, plan, from, to, amount).await?
            }
            None => self.price(user_id, plan, from, to, amount).await?,
        };

        let store = self.ledger.store();
        let source = store
            .find_wallet(user_id, from)
            .await?
            .ok_or(SwapError::InsufficientFunds {
                available: Decimal::ZERO,
                required: amount,
            })?;
        if source.available() < amount {
            return Err(SwapError::InsufficientFunds {
                available: source.available(),
                required: amount,
            });
        }
        let destination = store.get_or_create_wallet(user_id, to).await?;

        let reference = new_reference("SWP");
        let now = self.ledger.clock().now();
        let mut out_leg = Transaction::new_pending(
            source.id,
            user_id,
            TxType::SwapOut,
            amount - quote.fee,
            from.clone(),
            quote.fee,
            reference.clone(),
            TransactionMetadata {
                plan: Some(plan),
                gross_amount: Some(amount),
                market_rate: Some(quote.market_rate),
                ..Default::default()
            },
            now,
        );
        out_leg.idempotency_key = idempotency_key.map(str::to_string);
        out_leg.exchange_rate = Some(quote.rate);

        let mut in_leg = Transaction::new_pending(
            destination.id,
            user_id,
            TxType::SwapIn,
            quote.amount_out,
            to.clone(),
            Decimal::ZERO,
            reference,
            TransactionMetadata {
                plan: Some(plan),
                market_rate: Some(quote.market_rate),
                spread_revenue: Some(quote.spread_revenue),
                ..Default::default()
            },
            now,
        );
        in_leg.exchange_rate = Some(quote.rate);

        let settled = self
            .ledger
            .execute_pair(PairRequest {
                out_leg,
                in_leg,
                debit_amount: amount,
                credit_amount: quote.amount_out,
                debit_mode: DebitMode::Direct,
                spread_revenue: quote.spread_revenue,
            })
            .await;
        let (out, inn) = match (settled, idempotency_key) {
            (Ok(legs), _) => legs,
            (Err(LedgerError::Duplicate(_)), Some(key)) => {
                // Another instance recorded the same key first
                return self
                    .replay(user_id, key)
                    .await?
                    .ok_or_else(|| SwapError::IdempotencyConflict(key.to_string()));
            }
            (Err(e), _) => return Err(e.into()),
        };

        info!(
            reference = %out.reference,
            user_id,
            %from,
            %to,
            amount_in = %amount,
            amount_out = %inn.amount,
            "Swap executed"
        );
        Ok(SwapResult::from_legs(&out, &inn))
    }

    async fn replay(&self, user_id: UserId, key: &str) -> Result<Option<SwapResult>, SwapError> {
        let store = self.ledger.store();
        let Some(out) = store.find_by_idempotency_key(user_id, key).await? else {
            return Ok(None);
        };
        if out.tx_type != TxType::SwapOut {
            return Err(SwapError::IdempotencyConflict(key.to_string()));
        }
        let legs = store.find_by_reference(&out.reference).await?;
        let inn = legs
            .iter()
            .find(|t| t.tx_type == TxType::SwapIn)
            .ok_or_else(|| SwapError::IdempotencyConflict(key.to_string()))?;
        debug!(reference = %out.reference, %key, "Swap replayed by idempotency key");
        Ok(Some(SwapResult::from_legs(&out, inn)))
    }

    /// Fee first, then convert the net amount at the spread-adjusted rate.
    async fn price(
        &self,
        user_id: UserId,
        plan: PlanTier,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
    ) -> Result<SwapQuote, SwapError> {
        if from == to {
            return Err(SwapError::SameCurrency);
        }
        let amount = validate_amount(amount, from).map_err(|e| SwapError::InvalidAmount(e.to_string()))?;

        let fee = self
            .commission
            .calculate_commission(CommissionType::Swap, amount, from, plan)
            .await?;
        let market_rate = self.fx.get_rate(from, to, false).await?;
        let rate = self.effective_rate(from, to, market_rate, plan);

        let net = fee.net_amount;
        let amount_out = round_amount(net * rate, to);
        let market_out = round_amount(net * market_rate, to);
        let spread_revenue = (market_out - amount_out).max(Decimal::ZERO);

        Ok(SwapQuote {
            lock_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            from_currency: from.clone(),
            to_currency: to.clone(),
            amount_in: amount,
            fee: fee.fee,
            rate,
            market_rate,
            amount_out,
            spread_revenue,
            expires_at: self.quotes.expiry_from_now(),
        })
    }

    /// Buying crypto pays the ask (price of `to` in `from` marked up);
    /// everything else receives the bid.
    fn effective_rate(&self, from: &Currency, to: &Currency, market_rate: Decimal, plan: PlanTier) -> Decimal {
        if from.is_fiat() && to.is_crypto() && market_rate > Decimal::ZERO {
            let price = Decimal::ONE / market_rate;
            let ask = self.commission.calculate_spread(SpreadSide::Buy, price, plan).price;
            round_rate(Decimal::ONE / ask)
        } else {
            self.commission
                .calculate_spread(SpreadSide::Sell, market_rate, plan)
                .price
        }
    }
}
