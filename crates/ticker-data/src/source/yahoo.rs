//! Yahoo Finance quote source.
//!
//! Two provider surfaces are combined per symbol:
//! - the chart API (via `yahoo_finance_api`) for daily OHLCV history
//! - the quote-summary JSON endpoint (via `reqwest`) for last price,
//!   volume, asset type, currency, and fundamentals
//!
//! Provider failures are mapped onto the [`BatchOutcome`] taxonomy here;
//! callers never see HTTP details. A 429 anywhere aborts the batch as
//! `Throttled`; network errors, timeouts, and 5xx abort it as `Transient`;
//! unknown symbols and malformed payloads become per-symbol failures.

use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use yahoo_finance_api as yahoo;

use async_trait::async_trait;
use ticker_core::domain::quote::{truncate_price, AssetType, DailyBar, Fundamentals, QuoteRecord};

use super::{BatchOutcome, QuoteSource, SymbolOutcome};
use crate::error::{DataError, Result};

const QUOTE_SUMMARY_BASE: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Yahoo Finance implementation of [`QuoteSource`].
pub struct YahooQuoteSource {
    connector: yahoo::YahooConnector,
    client: Client,
    /// Chart range requested per symbol (e.g. "3mo", "1y")
    history_range: String,
}

/// Internal per-symbol fetch resolution, before batch aggregation.
enum SymbolFetch {
    Record(QuoteRecord),
    Failed(String),
    Throttled(String),
    Transient(String),
}

impl YahooQuoteSource {
    /// Create a new source with a 30 s request timeout.
    pub fn new() -> Result<Self> {
        let connector = yahoo::YahooConnector::new()
            .map_err(|e| DataError::FetchError(format!("Yahoo Finance init failed: {}", e)))?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DataError::FetchError(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            connector,
            client,
            history_range: "3mo".to_string(),
        })
    }

    /// Override the chart range requested per symbol.
    pub fn with_history_range(mut self, range: impl Into<String>) -> Self {
        self.history_range = range.into();
        self
    }

    /// Currency fallback from the symbol suffix when the provider omits it.
    fn guess_currency(symbol: &str) -> &'static str {
        if symbol.ends_with(".SA") {
            "BRL"
        } else if symbol.ends_with(".KS") || symbol.ends_with(".KQ") {
            "KRW"
        } else if symbol.ends_with(".T") {
            "JPY"
        } else if symbol.ends_with(".L") {
            "GBP"
        } else {
            "USD"
        }
    }

    async fn fetch_symbol(&self, symbol: &str) -> SymbolFetch {
        let summary = match self.fetch_quote_summary(symbol).await {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };

        let last_price = match summary
            .price
            .regular_market_price
            .and_then(|v| v.raw)
            .and_then(Decimal::from_f64_retain)
        {
            Some(p) => truncate_price(p),
            None => return SymbolFetch::Failed(format!("no market price for {}", symbol)),
        };

        let observed_at = summary
            .price
            .regular_market_time
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);

        let currency = summary
            .price
            .currency
            .clone()
            .unwrap_or_else(|| Self::guess_currency(symbol).to_string());

        let asset_type = summary
            .price
            .quote_type
            .as_deref()
            .map(AssetType::from_provider)
            .unwrap_or(AssetType::Stock);

        let fundamentals = summary.fundamentals();

        let history = match self.fetch_history(symbol).await {
            Ok(bars) => bars,
            // Throttle and infrastructure failures must retry the batch
            Err(SymbolFetch::Throttled(msg)) => return SymbolFetch::Throttled(msg),
            Err(SymbolFetch::Transient(msg)) => return SymbolFetch::Transient(msg),
            Err(_) => {
                // A quote without chart data is still worth persisting
                warn!(symbol = symbol, "history unavailable, saving quote only");
                Vec::new()
            }
        };

        SymbolFetch::Record(QuoteRecord {
            symbol: symbol.to_string(),
            asset_type,
            currency,
            last_price,
            volume: summary.price.regular_market_volume.and_then(|v| v.raw),
            observed_at,
            fundamentals,
            history,
        })
    }

    /// Quote-summary request; errors come back pre-classified.
    async fn fetch_quote_summary(
        &self,
        symbol: &str,
    ) -> std::result::Result<QuoteSummaryResult, SymbolFetch> {
        let url = format!(
            "{}/{}?modules=price,summaryDetail,defaultKeyStatistics",
            QUOTE_SUMMARY_BASE, symbol
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                SymbolFetch::Transient(e.to_string())
            } else {
                SymbolFetch::Failed(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(SymbolFetch::Throttled(format!("429 for {}", symbol)))
            }
            StatusCode::NOT_FOUND => {
                return Err(SymbolFetch::Failed(format!("symbol not found: {}", symbol)))
            }
            status if status.is_server_error() => {
                return Err(SymbolFetch::Transient(format!(
                    "provider returned {} for {}",
                    status, symbol
                )))
            }
            status if !status.is_success() => {
                return Err(SymbolFetch::Failed(format!(
                    "provider returned {} for {}",
                    status, symbol
                )))
            }
            _ => {}
        }

        let envelope: QuoteSummaryEnvelope = response
            .json()
            .await
            .map_err(|e| SymbolFetch::Failed(format!("malformed response: {}", e)))?;

        envelope
            .quote_summary
            .result
            .into_iter()
            .next()
            .ok_or_else(|| SymbolFetch::Failed(format!("empty result for {}", symbol)))
    }

    /// Daily OHLCV bars, oldest first.
    async fn fetch_history(
        &self,
        symbol: &str,
    ) -> std::result::Result<Vec<DailyBar>, SymbolFetch> {
        let response = self
            .connector
            .get_quote_range(symbol, "1d", &self.history_range)
            .await
            .map_err(|e| classify_chart_error(&e))?;

        let quotes = response
            .quotes()
            .map_err(|e| SymbolFetch::Failed(format!("quote parse error: {}", e)))?;

        debug!(symbol = symbol, bars = quotes.len(), "chart data received");

        let mut bars: Vec<DailyBar> = quotes
            .iter()
            .filter_map(|q| {
                let ts = i64::try_from(q.timestamp).ok()?;
                let date = Utc.timestamp_opt(ts, 0).single()?.date_naive();
                Some(DailyBar {
                    date,
                    open: truncate_price(Decimal::from_f64_retain(q.open)?),
                    high: truncate_price(Decimal::from_f64_retain(q.high)?),
                    low: truncate_price(Decimal::from_f64_retain(q.low)?),
                    close: truncate_price(Decimal::from_f64_retain(q.close)?),
                    volume: i64::try_from(q.volume).ok(),
                })
            })
            .collect();

        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }
}

/// Classify a chart-API error the same way the original provider did:
/// by inspecting the message, since the library flattens HTTP status.
fn classify_chart_error(err: &yahoo::YahooError) -> SymbolFetch {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("429") || lower.contains("too many requests") {
        SymbolFetch::Throttled(msg)
    } else if lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("network")
    {
        SymbolFetch::Transient(msg)
    } else {
        SymbolFetch::Failed(msg)
    }
}

#[async_trait]
impl QuoteSource for YahooQuoteSource {
    async fn fetch_batch(&self, symbols: &[String]) -> Result<BatchOutcome> {
        let mut outcomes = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            match self.fetch_symbol(symbol).await {
                SymbolFetch::Record(record) => outcomes.push(SymbolOutcome::Record(record)),
                SymbolFetch::Failed(reason) => {
                    warn!(symbol = %symbol, reason = %reason, "permanent symbol failure");
                    outcomes.push(SymbolOutcome::Failed {
                        symbol: symbol.clone(),
                        reason,
                    });
                }
                // A throttle or infrastructure failure mid-batch voids the
                // whole call; the fetch engine retries the batch as a unit
                SymbolFetch::Throttled(msg) => return Ok(BatchOutcome::Throttled(msg)),
                SymbolFetch::Transient(msg) => return Ok(BatchOutcome::Transient(msg)),
            }
        }

        Ok(BatchOutcome::Success(outcomes))
    }

    async fn health_check(&self) -> bool {
        self.connector.get_latest_quotes("SPY", "1d").await.is_ok()
    }
}

// =============================================================================
// Quote-summary wire format
// =============================================================================

/// `{"raw": 12.34, "fmt": "12.34"}` wrapper used throughout the payload.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct RawValue<T> {
    raw: Option<T>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryEnvelope {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummaryBody,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryBody {
    #[serde(default)]
    result: Vec<QuoteSummaryResult>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSummaryResult {
    #[serde(default)]
    price: PriceModule,
    #[serde(rename = "summaryDetail", default)]
    summary_detail: SummaryDetailModule,
    #[serde(rename = "defaultKeyStatistics", default)]
    key_statistics: KeyStatisticsModule,
}

#[derive(Debug, Default, Deserialize)]
struct PriceModule {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<RawValue<f64>>,
    #[serde(rename = "regularMarketVolume")]
    regular_market_volume: Option<RawValue<i64>>,
    #[serde(rename = "regularMarketTime")]
    regular_market_time: Option<i64>,
    #[serde(rename = "marketCap")]
    market_cap: Option<RawValue<i64>>,
    currency: Option<String>,
    #[serde(rename = "quoteType")]
    quote_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryDetailModule {
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<RawValue<f64>>,
    #[serde(rename = "dividendYield")]
    dividend_yield: Option<RawValue<f64>>,
    #[serde(rename = "marketCap")]
    market_cap: Option<RawValue<i64>>,
}

#[derive(Debug, Default, Deserialize)]
struct KeyStatisticsModule {
    #[serde(rename = "trailingEps")]
    trailing_eps: Option<RawValue<f64>>,
}

impl QuoteSummaryResult {
    fn fundamentals(&self) -> Fundamentals {
        Fundamentals {
            pe_ratio: self
                .summary_detail
                .trailing_pe
                .and_then(|v| v.raw)
                .and_then(Decimal::from_f64_retain),
            eps: self
                .key_statistics
                .trailing_eps
                .and_then(|v| v.raw)
                .and_then(Decimal::from_f64_retain),
            dividend_yield: self
                .summary_detail
                .dividend_yield
                .and_then(|v| v.raw)
                .and_then(Decimal::from_f64_retain),
            market_cap: self
                .price
                .market_cap
                .and_then(|v| v.raw)
                .or_else(|| self.summary_detail.market_cap.and_then(|v| v.raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_guess_currency() {
        assert_eq!(YahooQuoteSource::guess_currency("PETR4.SA"), "BRL");
        assert_eq!(YahooQuoteSource::guess_currency("005930.KS"), "KRW");
        assert_eq!(YahooQuoteSource::guess_currency("7203.T"), "JPY");
        assert_eq!(YahooQuoteSource::guess_currency("AAPL"), "USD");
    }

    #[test]
    fn test_quote_summary_parsing() {
        let payload = r#"{
            "quoteSummary": {
                "result": [{
                    "price": {
                        "regularMarketPrice": {"raw": 38.91234, "fmt": "38.91"},
                        "regularMarketVolume": {"raw": 12345678, "fmt": "12.35M"},
                        "regularMarketTime": 1752519000,
                        "marketCap": {"raw": 504000000000, "fmt": "504B"},
                        "currency": "BRL",
                        "quoteType": "EQUITY"
                    },
                    "summaryDetail": {
                        "trailingPE": {"raw": 4.21, "fmt": "4.21"},
                        "dividendYield": {"raw": 0.1834, "fmt": "18.34%"}
                    },
                    "defaultKeyStatistics": {
                        "trailingEps": {"raw": 9.24, "fmt": "9.24"}
                    }
                }],
                "error": null
            }
        }"#;

        let envelope: QuoteSummaryEnvelope = serde_json::from_str(payload).unwrap();
        let result = envelope.quote_summary.result.into_iter().next().unwrap();

        assert_eq!(result.price.currency.as_deref(), Some("BRL"));
        assert_eq!(result.price.quote_type.as_deref(), Some("EQUITY"));
        assert_eq!(result.price.regular_market_volume.unwrap().raw, Some(12345678));

        let f = result.fundamentals();
        assert_eq!(f.pe_ratio, Some(dec!(4.21)));
        assert_eq!(f.eps, Some(dec!(9.24)));
        assert_eq!(f.market_cap, Some(504000000000));
    }

    #[test]
    fn test_quote_summary_missing_modules() {
        let payload = r#"{"quoteSummary": {"result": [{"price": {}}], "error": null}}"#;
        let envelope: QuoteSummaryEnvelope = serde_json::from_str(payload).unwrap();
        let result = envelope.quote_summary.result.into_iter().next().unwrap();
        assert!(result.fundamentals().is_empty());
        assert!(result.price.regular_market_price.is_none());
    }

    #[test]
    fn test_chart_error_classification() {
        let throttled = yahoo::YahooError::FetchFailed("429 Too Many Requests".to_string());
        assert!(matches!(
            classify_chart_error(&throttled),
            SymbolFetch::Throttled(_)
        ));

        let transient = yahoo::YahooError::FetchFailed("connection reset by peer".to_string());
        assert!(matches!(
            classify_chart_error(&transient),
            SymbolFetch::Transient(_)
        ));

        let permanent = yahoo::YahooError::FetchFailed("404 Not Found".to_string());
        assert!(matches!(
            classify_chart_error(&permanent),
            SymbolFetch::Failed(_)
        ));
    }
}
