//! Hardcoded last-resort rates.
//!
//! Only consulted when every live source failed and no cache entry exists.
//! Values are USD prices per unit and are deliberately coarse.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core_types::Currency;
use crate::money::round_rate;

const USD_VALUES: &[(&str, Decimal)] = &[
    ("USD", dec!(1)),
    ("EUR", dec!(1.08)),
    ("GBP", dec!(1.27)),
    ("CAD", dec!(0.73)),
    ("NGN", dec!(0.00065)),
    ("GHS", dec!(0.067)),
    ("KES", dec!(0.0077)),
    ("ZAR", dec!(0.054)),
    ("BTC", dec!(65000)),
    ("ETH", dec!(3500)),
    ("USDT", dec!(1)),
    ("USDC", dec!(1)),
    ("SOL", dec!(150)),
    ("BNB", dec!(580)),
];

fn usd_value(currency: &Currency) -> Option<Decimal> {
    USD_VALUES
        .iter()
        .find(|(code, _)| *code == currency.as_str())
        .map(|(_, v)| *v)
}

/// Rate for `from -> to` derived through USD, if both sides are in the table.
pub fn fallback_rate(from: &Currency, to: &Currency) -> Option<Decimal> {
    let from_usd = usd_value(from)?;
    let to_usd = usd_value(to)?;
    if to_usd.is_zero() {
        return None;
    }
    Some(round_rate(from_usd / to_usd))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(code: &str) -> Currency {
        Currency::new(code).unwrap()
    }

    #[test]
    fn test_direct_and_inverse() {
        assert_eq!(fallback_rate(&c("EUR"), &c("USD")), Some(dec!(1.08)));
        assert_eq!(fallback_rate(&c("USD"), &c("BTC")), Some(round_rate(dec!(1) / dec!(65000))));
    }

    #[test]
    fn test_cross_rate() {
        // EUR -> GBP through USD
        let r = fallback_rate(&c("EUR"), &c("GBP")).unwrap();
        assert_eq!(r, round_rate(dec!(1.08) / dec!(1.27)));
    }

    #[test]
    fn test_unknown_pair() {
        assert!(fallback_rate(&c("XAU"), &c("USD")).is_none());
        assert!(fallback_rate(&c("USD"), &c("JPY")).is_none());
    }
}
