//! Live price sources.
//!
//! Two source kinds: a crypto price feed (crypto priced in a fiat currency)
//! and a fiat rate feed. Both are blocking I/O with a short timeout and are
//! called without holding any lock.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use super::FxError;
use crate::core_types::Currency;

#[async_trait]
pub trait CryptoPriceSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Price of one unit of `crypto` in `fiat`.
    async fn price(&self, crypto: &Currency, fiat: &Currency) -> Result<Decimal, FxError>;
}

#[async_trait]
pub trait FiatRateSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Units of `to` per one unit of `from`.
    async fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal, FxError>;
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, FxError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(FxError::from)
}

/// JSON numbers come back as f64 text; parse through the string form so
/// `0.1` stays `0.1`.
pub(crate) fn json_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

/// CoinGecko `simple/price` feed.
pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, FxError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.into(),
        })
    }

    /// CoinGecko asset id for a ticker
    fn coin_id(crypto: &Currency) -> Option<&'static str> {
        match crypto.as_str() {
            "BTC" => Some("bitcoin"),
            "ETH" => Some("ethereum"),
            "USDT" => Some("tether"),
            "USDC" => Some("usd-coin"),
            "SOL" => Some("solana"),
            "BNB" => Some("binancecoin"),
            "LTC" => Some("litecoin"),
            "TRX" => Some("tron"),
            "XRP" => Some("ripple"),
            "DOGE" => Some("dogecoin"),
            _ => None,
        }
    }
}

#[async_trait]
impl CryptoPriceSource for CoinGeckoSource {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn price(&self, crypto: &Currency, fiat: &Currency) -> Result<Decimal, FxError> {
        let id = Self::coin_id(crypto)
            .ok_or_else(|| FxError::InvalidResponse(format!("unknown asset {}", crypto)))?;
        let vs = fiat.as_str().to_ascii_lowercase();
        let url = format!("{}/simple/price", self.base_url.trim_end_matches('/'));

        let body: Value = self
            .client
            .get(&url)
            .query(&[("ids", id), ("vs_currencies", vs.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.get(id)
            .and_then(|prices| prices.get(&vs))
            .and_then(json_decimal)
            .ok_or_else(|| FxError::InvalidResponse(format!("no {}/{} price", crypto, fiat)))
    }
}

/// open.er-api.com style `latest/{BASE}` feed.
pub struct ExchangeRateApiSource {
    client: reqwest::Client,
    base_url: String,
}

impl ExchangeRateApiSource {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, FxError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl FiatRateSource for ExchangeRateApiSource {
    fn name(&self) -> &'static str {
        "exchangerate-api"
    }

    async fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal, FxError> {
        let url = format!("{}/latest/{}", self.base_url.trim_end_matches('/'), from);

        let body: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if body.get("result").and_then(Value::as_str) == Some("error") {
            let kind = body
                .get("error-type")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(FxError::SourceUnavailable(kind.to_string()));
        }

        body.get("rates")
            .and_then(|rates| rates.get(to.as_str()))
            .and_then(json_decimal)
            .ok_or_else(|| FxError::InvalidResponse(format!("no {}/{} rate", from, to)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_json_decimal_parsing() {
        assert_eq!(json_decimal(&json!(0.1)), Some(dec!(0.1)));
        assert_eq!(json_decimal(&json!(65000)), Some(dec!(65000)));
        assert_eq!(json_decimal(&json!("1.08")), Some(dec!(1.08)));
        assert_eq!(json_decimal(&json!(null)), None);
    }

    #[test]
    fn test_coin_ids() {
        let btc = Currency::new("BTC").unwrap();
        assert_eq!(CoinGeckoSource::coin_id(&btc), Some("bitcoin"));
        let usd = Currency::new("USD").unwrap();
        assert_eq!(CoinGeckoSource::coin_id(&usd), None);
    }
}
