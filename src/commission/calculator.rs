use cached::{Cached, TimedCache};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::CommissionError;
use super::store::CommissionStore;
use super::types::{
    CommissionKind, CommissionResult, CommissionSetting, CommissionType, SettingSource, SpreadResult,
    SpreadSide,
};
use crate::config::CommissionConfig;
use crate::core_types::{Currency, PlanTier};
use crate::money::{round_amount, round_rate};

/// Resolves fees and spreads.
///
/// Active settings are read through a short-lived snapshot so admin changes
/// become visible within `settings_ttl_secs` without a restart.
pub struct CommissionCalculator {
    store: Arc<dyn CommissionStore>,
    config: CommissionConfig,
    snapshot: Mutex<TimedCache<&'static str, Arc<Vec<CommissionSetting>>>>,
}

impl CommissionCalculator {
    pub fn new(store: Arc<dyn CommissionStore>, config: CommissionConfig) -> Self {
        let ttl = config.settings_ttl_secs;
        Self {
            store,
            config,
            snapshot: Mutex::new(TimedCache::with_lifespan(ttl)),
        }
    }

    pub fn store(&self) -> &Arc<dyn CommissionStore> {
        &self.store
    }

    /// Drop the settings snapshot; the next calculation re-reads the store.
    pub fn invalidate(&self) {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cache_clear();
    }

    async fn active_settings(&self) -> Result<Arc<Vec<CommissionSetting>>, CommissionError> {
        {
            let mut cache = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.cache_get(&"settings") {
                return Ok(hit.clone());
            }
        }

        let active: Vec<CommissionSetting> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|s| s.active)
            .collect();
        debug!(count = active.len(), "Loaded commission settings");

        let active = Arc::new(active);
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cache_set("settings", active.clone());
        Ok(active)
    }

    /// Specific `(type, currency)` row, then the global row, then `None`.
    fn resolve<'a>(
        settings: &'a [CommissionSetting],
        tx_type: CommissionType,
        currency: &Currency,
    ) -> Option<(&'a CommissionSetting, SettingSource)> {
        settings
            .iter()
            .find(|s| s.tx_type == tx_type && s.currency.as_ref() == Some(currency))
            .map(|s| (s, SettingSource::Specific))
            .or_else(|| {
                settings
                    .iter()
                    .find(|s| s.tx_type == tx_type && s.currency.is_none())
                    .map(|s| (s, SettingSource::Global))
            })
    }

    fn platform_default(&self, tx_type: CommissionType) -> Decimal {
        self.config
            .default_rates
            .get(tx_type.as_str())
            .copied()
            .unwrap_or(self.config.default_rate)
    }

    pub async fn calculate_commission(
        &self,
        tx_type: CommissionType,
        amount: Decimal,
        currency: &Currency,
        plan: PlanTier,
    ) -> Result<CommissionResult, CommissionError> {
        if amount <= Decimal::ZERO {
            return Err(CommissionError::InvalidAmount);
        }
        let settings = self.active_settings().await?;
        let multiplier = self.config.plan_multipliers.for_plan(plan);

        let (kind, base, min_fee, max_fee, source) = match Self::resolve(&settings, tx_type, currency) {
            Some((s, source)) => (s.kind, s.value, s.min_fee, s.max_fee, source),
            None => (
                CommissionKind::Percentage,
                self.platform_default(tx_type),
                None,
                None,
                SettingSource::PlatformDefault,
            ),
        };

        // Plan discount applies to the rate or flat value, before bounds.
        let rate = round_rate(base * multiplier);
        let mut fee = match kind {
            CommissionKind::Percentage => amount * rate,
            CommissionKind::Fixed => rate,
        };
        if let Some(min) = min_fee {
            fee = fee.max(min);
        }
        if let Some(max) = max_fee {
            fee = fee.min(max);
        }
        let fee = round_amount(fee, currency);
        // Capping the fee at the amount would undercut min_fee
        if fee > amount {
            return Err(CommissionError::AmountBelowFee { amount, fee });
        }

        Ok(CommissionResult {
            fee,
            rate,
            net_amount: amount - fee,
            kind,
            source,
        })
    }

    /// Effective spread fraction for a plan.
    pub fn spread_rate(&self, plan: PlanTier) -> Decimal {
        round_rate(self.config.spread * self.config.plan_multipliers.for_plan(plan))
    }

    /// Mark a market price up (BUY) or down (SELL) by the plan-adjusted spread.
    pub fn calculate_spread(&self, side: SpreadSide, market_price: Decimal, plan: PlanTier) -> SpreadResult {
        let spread = self.spread_rate(plan);
        let price = match side {
            SpreadSide::Buy => market_price * (Decimal::ONE + spread),
            SpreadSide::Sell => market_price * (Decimal::ONE - spread),
        };
        SpreadResult {
            market_price,
            price: round_rate(price),
            spread,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commission::store::MemoryCommissionStore;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn calc(settings: Vec<CommissionSetting>) -> CommissionCalculator {
        CommissionCalculator::new(
            Arc::new(MemoryCommissionStore::with_settings(settings)),
            CommissionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_platform_default_deposit_fee() {
        let c = calc(vec![]);
        let r = c
            .calculate_commission(CommissionType::Deposit, dec!(100), &usd(), PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(r.fee, dec!(7.00));
        assert_eq!(r.net_amount, dec!(93.00));
        assert_eq!(r.source, SettingSource::PlatformDefault);
    }

    #[tokio::test]
    async fn test_specific_beats_global() {
        let c = calc(vec![
            CommissionSetting::percentage(CommissionType::Deposit, None, dec!(0.05)),
            CommissionSetting::percentage(CommissionType::Deposit, Some(usd()), dec!(0.02)),
        ]);
        let r = c
            .calculate_commission(CommissionType::Deposit, dec!(100), &usd(), PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(r.fee, dec!(2.00));
        assert_eq!(r.source, SettingSource::Specific);

        let eur = Currency::new("EUR").unwrap();
        let r = c
            .calculate_commission(CommissionType::Deposit, dec!(100), &eur, PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(r.fee, dec!(5.00));
        assert_eq!(r.source, SettingSource::Global);
    }

    #[tokio::test]
    async fn test_inactive_rows_ignored() {
        let mut off = CommissionSetting::percentage(CommissionType::Deposit, Some(usd()), dec!(0.5));
        off.active = false;
        let c = calc(vec![off]);
        let r = c
            .calculate_commission(CommissionType::Deposit, dec!(10), &usd(), PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(r.fee, dec!(0.70));
    }

    #[tokio::test]
    async fn test_fee_bounds_clamp() {
        let c = calc(vec![
            CommissionSetting::percentage(CommissionType::Withdrawal, None, dec!(0.01))
                .with_bounds(Some(dec!(1)), Some(dec!(20))),
        ]);
        let small = c
            .calculate_commission(CommissionType::Withdrawal, dec!(10), &usd(), PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(small.fee, dec!(1.00));

        let large = c
            .calculate_commission(CommissionType::Withdrawal, dec!(5000), &usd(), PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(large.fee, dec!(20.00));
    }

    #[tokio::test]
    async fn test_fixed_fee_scaled_by_plan() {
        let c = calc(vec![CommissionSetting::fixed(CommissionType::Transfer, None, dec!(2))]);
        let free = c
            .calculate_commission(CommissionType::Transfer, dec!(50), &usd(), PlanTier::Free)
            .await
            .unwrap();
        let business = c
            .calculate_commission(CommissionType::Transfer, dec!(50), &usd(), PlanTier::Business)
            .await
            .unwrap();
        assert_eq!(free.fee, dec!(2.00));
        assert_eq!(business.fee, dec!(1.00));
    }

    #[tokio::test]
    async fn test_plan_ordering_holds() {
        let c = calc(vec![]);
        let mut fees = Vec::new();
        for plan in [PlanTier::Free, PlanTier::Pro, PlanTier::Business] {
            let r = c
                .calculate_commission(CommissionType::Deposit, dec!(333.33), &usd(), plan)
                .await
                .unwrap();
            fees.push(r.fee);
        }
        assert!(fees[2] <= fees[1] && fees[1] <= fees[0]);
        assert_eq!(fees[1], dec!(18.67)); // 333.33 * 0.056
    }

    #[tokio::test]
    async fn test_amount_below_fee_is_refused() {
        let c = calc(vec![CommissionSetting::fixed(CommissionType::Deposit, None, dec!(5))]);
        let err = c
            .calculate_commission(CommissionType::Deposit, dec!(3), &usd(), PlanTier::Free)
            .await
            .unwrap_err();
        assert!(matches!(err, CommissionError::AmountBelowFee { .. }));
        assert_eq!(err.http_status(), 400);

        let exact = c
            .calculate_commission(CommissionType::Deposit, dec!(5), &usd(), PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(exact.net_amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_amount_under_min_fee_never_undercuts_it() {
        let c = calc(vec![
            CommissionSetting::percentage(CommissionType::Deposit, None, dec!(0.01))
                .with_bounds(Some(dec!(2)), Some(dec!(5))),
        ]);
        let err = c
            .calculate_commission(CommissionType::Deposit, dec!(1), &usd(), PlanTier::Free)
            .await
            .unwrap_err();
        match err {
            CommissionError::AmountBelowFee { amount, fee } => {
                assert_eq!(amount, dec!(1));
                assert_eq!(fee, dec!(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalidate_picks_up_new_settings() {
        let store = Arc::new(MemoryCommissionStore::new());
        let c = CommissionCalculator::new(store.clone(), CommissionConfig::default());
        let before = c
            .calculate_commission(CommissionType::Swap, dec!(100), &usd(), PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(before.fee, dec!(0.50));

        store
            .upsert(CommissionSetting::percentage(CommissionType::Swap, None, dec!(0.01)))
            .await
            .unwrap();
        c.invalidate();
        let after = c
            .calculate_commission(CommissionType::Swap, dec!(100), &usd(), PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(after.fee, dec!(1.00));
    }

    #[test]
    fn test_spread_sides() {
        let c = calc(vec![]);
        let buy = c.calculate_spread(SpreadSide::Buy, dec!(100), PlanTier::Free);
        let sell = c.calculate_spread(SpreadSide::Sell, dec!(100), PlanTier::Free);
        assert_eq!(buy.price, dec!(102));
        assert_eq!(sell.price, dec!(98));

        let biz = c.calculate_spread(SpreadSide::Buy, dec!(100), PlanTier::Business);
        assert_eq!(biz.spread, dec!(0.01));
        assert_eq!(biz.price, dec!(101));
    }
}
