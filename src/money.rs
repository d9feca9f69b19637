//! Money Handling Module
//!
//! All balances and amounts are `rust_decimal::Decimal`; floating point never
//! touches a balance. Every amount that is persisted or shown to a client goes
//! through this module so rounding is applied in exactly one place.
//!
//! ## Scale
//! - Fiat currencies: 2 decimal places
//! - Crypto currencies: 8 decimal places
//!
//! Rounding is midpoint-away-from-zero (commercial rounding).

use crate::core_types::Currency;
use rust_decimal::prelude::*;
use thiserror::Error;

/// Money validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Round an amount to the currency's fixed-point scale.
#[inline]
pub fn round_amount(amount: Decimal, currency: &Currency) -> Decimal {
    amount.round_dp_with_strategy(currency.scale(), RoundingStrategy::MidpointAwayFromZero)
}

/// Round a rate for storage. Rates keep more precision than amounts.
#[inline]
pub fn round_rate(rate: Decimal) -> Decimal {
    rate.round_dp_with_strategy(12, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// Validate a client-supplied amount for a currency.
///
/// Rejects zero/negative values and more decimal places than the currency keeps.
pub fn validate_amount(amount: Decimal, currency: &Currency) -> Result<Decimal, MoneyError> {
    if amount <= Decimal::ZERO {
        return Err(MoneyError::InvalidAmount);
    }
    let normalized = amount.normalize();
    if normalized.scale() > currency.scale() {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: currency.scale(),
        });
    }
    Ok(normalized)
}

/// Parse a client amount string strictly.
///
/// Rejects `.5`, `5.`, signs and empty strings, then applies [`validate_amount`].
pub fn parse_amount(amount_str: &str, currency: &Currency) -> Result<Decimal, MoneyError> {
    let s = amount_str.trim();
    if s.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if s.starts_with('-') || s.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }
    if s.starts_with('.') {
        return Err(MoneyError::InvalidFormat(
            "missing leading zero (e.g., use 0.5 instead of .5)".into(),
        ));
    }
    if s.ends_with('.') {
        return Err(MoneyError::InvalidFormat(
            "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
        ));
    }
    let d = Decimal::from_str(s).map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;
    validate_amount(d, currency)
}

/// Format an amount with the currency's full scale, e.g. `93.00`.
pub fn format_amount(amount: Decimal, currency: &Currency) -> String {
    let rounded = round_amount(amount, currency);
    format!("{:.prec$}", rounded, prec = currency.scale() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn btc() -> Currency {
        Currency::new("BTC").unwrap()
    }

    #[test]
    fn test_round_amount_by_currency() {
        assert_eq!(round_amount(dec!(7.005), &usd()), dec!(7.01));
        assert_eq!(round_amount(dec!(7.004), &usd()), dec!(7.00));
        assert_eq!(round_amount(dec!(0.123456789), &btc()), dec!(0.12345679));
    }

    #[test]
    fn test_validate_amount() {
        assert_eq!(validate_amount(dec!(100), &usd()), Ok(dec!(100)));
        assert_eq!(validate_amount(dec!(0), &usd()), Err(MoneyError::InvalidAmount));
        assert_eq!(validate_amount(dec!(-1), &usd()), Err(MoneyError::InvalidAmount));
        assert_eq!(
            validate_amount(dec!(1.001), &usd()),
            Err(MoneyError::PrecisionOverflow { provided: 3, max: 2 })
        );
        // trailing zeros do not count against precision
        assert!(validate_amount(dec!(1.1000), &usd()).is_ok());
        assert!(validate_amount(dec!(0.00000001), &btc()).is_ok());
    }

    #[test]
    fn test_parse_amount_strict_format() {
        assert_eq!(parse_amount("1.5", &usd()).unwrap(), dec!(1.5));
        assert!(matches!(
            parse_amount(".5", &usd()),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_amount("5.", &usd()),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert_eq!(parse_amount("-5", &usd()), Err(MoneyError::InvalidAmount));
        assert!(matches!(
            parse_amount("", &usd()),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_amount("abc", &usd()),
            Err(MoneyError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(dec!(93), &usd()), "93.00");
        assert_eq!(format_amount(dec!(0.25), &btc()), "0.25000000");
    }
}
