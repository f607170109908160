//! Quote record and OHLCV bar types.
//!
//! A `QuoteRecord` is what one symbol yields from a single quote-source
//! call: last price, volume, optional fundamentals, and daily history.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimal places stored for prices.
pub const PRICE_SCALE: u32 = 4;

/// Asset classification as reported by the quote provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetType {
    /// Common stock
    Stock,
    /// Exchange-traded fund
    Etf,
    /// Mutual fund
    Fund,
    /// Cryptocurrency
    Crypto,
}

impl AssetType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stock => "STOCK",
            Self::Etf => "ETF",
            Self::Fund => "FUND",
            Self::Crypto => "CRYPTO",
        }
    }

    /// Map a provider `quoteType` string onto our classification.
    ///
    /// Unknown quote types fall back to `Stock`.
    pub fn from_provider(quote_type: &str) -> Self {
        match quote_type.to_uppercase().as_str() {
            "ETF" => Self::Etf,
            "MUTUALFUND" | "FUND" => Self::Fund,
            "CRYPTOCURRENCY" | "CRYPTO" => Self::Crypto,
            _ => Self::Stock,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STOCK" => Ok(Self::Stock),
            "ETF" => Ok(Self::Etf),
            "FUND" => Ok(Self::Fund),
            "CRYPTO" => Ok(Self::Crypto),
            _ => Err(format!("Unknown asset type: {}", s)),
        }
    }
}

/// Fundamental indicators; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    /// Price/earnings ratio
    pub pe_ratio: Option<Decimal>,
    /// Earnings per share
    pub eps: Option<Decimal>,
    /// Dividend yield (fraction, not percent)
    pub dividend_yield: Option<Decimal>,
    /// Market capitalization in the quote currency
    pub market_cap: Option<i64>,
}

impl Fundamentals {
    /// True when no field carries a value; such records are not persisted.
    pub fn is_empty(&self) -> bool {
        self.pe_ratio.is_none()
            && self.eps.is_none()
            && self.dividend_yield.is_none()
            && self.market_cap.is_none()
    }
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    /// Trading day
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Missing volume stays `None`, never zero
    pub volume: Option<i64>,
}

/// Full per-symbol result of one quote-source call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    /// Provider symbol (e.g. "PETR4.SA", "AAPL")
    pub symbol: String,
    pub asset_type: AssetType,
    /// ISO-like 3-char currency code
    pub currency: String,
    /// Last traded price, truncated to [`PRICE_SCALE`] decimals
    pub last_price: Decimal,
    /// Last session volume; `None` when the provider omits it
    pub volume: Option<i64>,
    /// Provider-side observation timestamp
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub fundamentals: Fundamentals,
    /// Daily bars delivered alongside the quote, oldest first
    #[serde(default)]
    pub history: Vec<DailyBar>,
}

/// Truncate a price to [`PRICE_SCALE`] decimal places.
///
/// Values beyond provider precision are cut, not rounded.
pub fn truncate_price(value: Decimal) -> Decimal {
    value.trunc_with_scale(PRICE_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_truncate_price_cuts_not_rounds() {
        assert_eq!(truncate_price(dec!(12.34567)), dec!(12.3456));
        assert_eq!(truncate_price(dec!(12.34569)), dec!(12.3456));
        assert_eq!(truncate_price(dec!(12.34)), dec!(12.34));
        assert_eq!(truncate_price(dec!(-3.99999)), dec!(-3.9999));
    }

    #[test]
    fn test_asset_type_from_provider() {
        assert_eq!(AssetType::from_provider("EQUITY"), AssetType::Stock);
        assert_eq!(AssetType::from_provider("ETF"), AssetType::Etf);
        assert_eq!(AssetType::from_provider("MUTUALFUND"), AssetType::Fund);
        assert_eq!(AssetType::from_provider("CRYPTOCURRENCY"), AssetType::Crypto);
        assert_eq!(AssetType::from_provider("something-new"), AssetType::Stock);
    }

    #[test]
    fn test_asset_type_round_trip() {
        for t in [
            AssetType::Stock,
            AssetType::Etf,
            AssetType::Fund,
            AssetType::Crypto,
        ] {
            assert_eq!(t.as_str().parse::<AssetType>().unwrap(), t);
        }
    }

    #[test]
    fn test_fundamentals_is_empty() {
        assert!(Fundamentals::default().is_empty());

        let with_pe = Fundamentals {
            pe_ratio: Some(dec!(11.2)),
            ..Default::default()
        };
        assert!(!with_pe.is_empty());
    }
}
