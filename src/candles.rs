//! Candle model and the exchange clients that supply it.

use crate::storage_utils::ApiConfig;
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// One OHLCV sample for a fixed time bucket.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandleQuery {
    pub interval: String,
    pub limit: u32,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Bitvavo caps a candles response at this many rows.
pub const MAX_CANDLES_PER_REQUEST: u32 = 1440;

/// Length of one candle for a Bitvavo interval such as `"5m"`, `"4h"` or `"1W"`.
pub fn interval_duration(interval: &str) -> Option<TimeDelta> {
    let split = interval.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = interval.split_at(split);
    let count: i64 = count.parse().ok().filter(|&n| n > 0)?;
    match unit {
        "m" => TimeDelta::try_minutes(count),
        "h" => TimeDelta::try_hours(count),
        "d" => TimeDelta::try_days(count),
        "W" => TimeDelta::try_weeks(count),
        _ => None,
    }
}

impl CandleQuery {
    pub fn latest(interval: impl Into<String>, limit: u32) -> Self {
        Self {
            interval: interval.into(),
            limit,
            start: None,
            end: None,
        }
    }

    pub fn between(
        interval: impl Into<String>,
        limit: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            interval: interval.into(),
            limit,
            start: Some(start),
            end: Some(end),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited by exchange (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("unexpected response format: {0}")]
    Decode(String),

    #[error("unknown market: {0}")]
    UnknownMarket(String),
}

/// Supplies time-ordered, de-duplicated candle series for a market.
pub trait CandleSource {
    fn candles(
        &self,
        market: &str,
        query: &CandleQuery,
    ) -> impl Future<Output = Result<Vec<Candle>, SourceError>> + Send;
}

/// Supplies the latest traded price for a market.
pub trait PriceSource {
    fn last_price(&self, market: &str) -> impl Future<Output = Result<f64, SourceError>> + Send;
}

// --- Lenient number parsing ---
// Bitvavo encodes prices and volumes as JSON strings.

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

/// `[timestamp_ms, open, high, low, close, volume]` as sent by `/{market}/candles`.
#[derive(Deserialize, Debug)]
struct RawCandle(
    i64,
    #[serde(deserialize_with = "deserialize_f64_lenient")] Option<f64>,
    #[serde(deserialize_with = "deserialize_f64_lenient")] Option<f64>,
    #[serde(deserialize_with = "deserialize_f64_lenient")] Option<f64>,
    #[serde(deserialize_with = "deserialize_f64_lenient")] Option<f64>,
    #[serde(deserialize_with = "deserialize_f64_lenient")] Option<f64>,
);

impl RawCandle {
    fn into_candle(self) -> Option<Candle> {
        let RawCandle(ts, open, high, low, close, volume) = self;
        // Prices must be finite and non-negative; "NaN", "inf" and "-1" all parse as f64.
        let price = |v: Option<f64>| v.filter(|p| p.is_finite() && *p >= 0.0);
        let volume = match volume {
            None => 0.0,
            v => price(v)?,
        };
        Some(Candle {
            timestamp: DateTime::from_timestamp_millis(ts)?,
            open: price(open)?,
            high: price(high)?,
            low: price(low)?,
            close: price(close)?,
            volume,
        })
    }
}

#[derive(Deserialize, Debug)]
struct TickerPrice {
    #[serde(deserialize_with = "deserialize_f64_lenient")]
    price: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    #[serde(rename = "errorCode")]
    error_code: i64,
    error: String,
}

/// **Candle Parser**
/// Parses a candles payload into an ascending series with unique timestamps.
/// Rows with missing, negative or non-finite prices, or an unrepresentable
/// timestamp, are dropped.
pub fn parse_candles(body: &[u8]) -> Result<Vec<Candle>, SourceError> {
    // 1. Decode the raw rows (Bitvavo sends them newest first)
    let raw: Vec<RawCandle> =
        serde_json::from_slice(body).map_err(|e| SourceError::Decode(e.to_string()))?;

    // 2. Keep only complete rows, then sort and de-duplicate by timestamp
    Ok(into_series(raw.into_iter().filter_map(RawCandle::into_candle).collect()))
}

pub fn into_series(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    candles
}

static BAN_EXPIRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"expires at\s+(\d+)").expect("static regex"));

/// Extracts the ban expiry (unix ms) from a Bitvavo rate-limit error message.
pub fn parse_ban_expiry(message: &str) -> Option<i64> {
    BAN_EXPIRY
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

// --- Bitvavo REST client ---

const ERR_RATE_LIMIT_BAN: i64 = 105;
const ERR_MARKET_INVALID: i64 = 205;
const RATE_LIMIT_RESET_HEADER: &str = "bitvavo-ratelimit-resetat";

#[derive(Debug, Clone)]
pub struct BitvavoClient {
    http: Client,
    base_url: String,
}

impl BitvavoClient {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .pool_max_idle_per_host(50)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Raw `/markets` payload, one JSON object per market.
    pub async fn markets(&self) -> Result<Vec<Map<String, Value>>, SourceError> {
        self.get_json("/markets", &[]).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let body = self.get_bytes(path, query).await?;
        serde_json::from_slice(&body).map_err(|e| SourceError::Decode(e.to_string()))
    }

    async fn get_bytes(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>, SourceError> {
        // 1. Send the request and grab the reset header before consuming the body
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();
        let reset_at = response
            .headers()
            .get(RATE_LIMIT_RESET_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let body = response.bytes().await?.to_vec();

        if status.is_success() {
            return Ok(body);
        }

        // 2. Bitvavo explains most failures in an {"errorCode", "error"} body
        let api_error: Option<ApiErrorBody> = serde_json::from_slice(&body).ok();

        // 3. Rate limited: wait out the ban so the next batch is accepted

        if status == StatusCode::TOO_MANY_REQUESTS
            || api_error.as_ref().is_some_and(|e| e.error_code == ERR_RATE_LIMIT_BAN)
        {
            let until = api_error
                .as_ref()
                .and_then(|e| parse_ban_expiry(&e.error))
                .or(reset_at);
            let retry_after_ms = wait_out_ban(until).await;
            return Err(SourceError::RateLimited { retry_after_ms });
        }

        // 4. Everything else is reported to the caller, which skips the market
        if let Some(err) = api_error {
            if err.error_code == ERR_MARKET_INVALID {
                return Err(SourceError::UnknownMarket(err.error));
            }
        }

        Err(SourceError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Sleeps until the ban expiry (plus a margin) so later requests are accepted.
/// Returns how long it waited.
async fn wait_out_ban(until_ms: Option<i64>) -> u64 {
    let Some(until_ms) = until_ms else {
        return 0;
    };
    let now = Utc::now().timestamp_millis();
    if until_ms <= now {
        return 0;
    }
    let wait_ms = (until_ms - now) as u64 + 5_000;
    warn!(wait_ms, "rate limited by exchange, pausing requests");
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    wait_ms
}

impl CandleSource for BitvavoClient {
    async fn candles(&self, market: &str, query: &CandleQuery) -> Result<Vec<Candle>, SourceError> {
        let mut params = vec![
            ("interval", query.interval.clone()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(start) = query.start {
            params.push(("start", start.timestamp_millis().to_string()));
        }
        if let Some(end) = query.end {
            params.push(("end", end.timestamp_millis().to_string()));
        }

        let body = self.get_bytes(&format!("/{}/candles", market), &params).await?;
        let candles = parse_candles(&body)?;
        debug!(market, interval = %query.interval, count = candles.len(), "fetched candles");
        Ok(candles)
    }
}

impl PriceSource for BitvavoClient {
    async fn last_price(&self, market: &str) -> Result<f64, SourceError> {
        let ticker: TickerPrice = self
            .get_json("/ticker/price", &[("market", market.to_string())])
            .await?;
        ticker
            .price
            .ok_or_else(|| SourceError::Decode(format!("no price for {}", market)))
    }
}

// --- Request batching ---

const BATCH_WINDOW: Duration = Duration::from_secs(62);

/// How many items fit in one rate-limit window when each costs
/// `weight_per_item`, keeping 10% headroom.
pub fn batch_size(weight_limit_per_minute: u32, weight_per_item: u32) -> usize {
    let safe_capacity = (weight_limit_per_minute as f64 * 0.90) as u32;
    std::cmp::max(1, safe_capacity / weight_per_item.max(1)) as usize
}

/// Runs `f` over `items` concurrently, `batch_size` at a time, pausing between
/// batches until the rate-limit window has rolled over. Output order matches
/// input order.
pub async fn in_batches<T, R, F, Fut>(items: &[T], batch_size: usize, f: F) -> Vec<R>
where
    F: Fn(&T) -> Fut,
    Fut: Future<Output = R>,
{
    let batch_size = batch_size.max(1);
    let mut results = Vec::with_capacity(items.len());

    for (i, batch) in items.chunks(batch_size).enumerate() {
        let started = tokio::time::Instant::now();

        // 1. Fire the whole batch concurrently
        let tasks: Vec<_> = batch.iter().map(&f).collect();
        results.extend(futures::future::join_all(tasks).await);

        // 2. Sleep out the rest of the window unless this was the last batch
        if i * batch_size + batch.len() < items.len() {
            let elapsed = started.elapsed();
            if elapsed < BATCH_WINDOW {
                debug!(batch = i, "waiting for rate-limit window");
                tokio::time::sleep(BATCH_WINDOW - elapsed).await;
            }
        }
    }
    results
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// In-memory market data keyed by market, then by interval.
    #[derive(Default)]
    pub struct StaticSource {
        pub candles: HashMap<(String, String), Vec<Candle>>,
        pub prices: HashMap<String, f64>,
    }

    impl StaticSource {
        pub fn with_candles(mut self, market: &str, interval: &str, candles: Vec<Candle>) -> Self {
            self.candles.insert((market.to_string(), interval.to_string()), candles);
            self
        }

        pub fn with_price(mut self, market: &str, price: f64) -> Self {
            self.prices.insert(market.to_string(), price);
            self
        }
    }

    impl CandleSource for StaticSource {
        async fn candles(&self, market: &str, query: &CandleQuery) -> Result<Vec<Candle>, SourceError> {
            self.candles
                .get(&(market.to_string(), query.interval.clone()))
                .cloned()
                .ok_or_else(|| SourceError::UnknownMarket(market.to_string()))
        }
    }

    impl PriceSource for StaticSource {
        async fn last_price(&self, market: &str) -> Result<f64, SourceError> {
            self.prices
                .get(market)
                .copied()
                .ok_or_else(|| SourceError::UnknownMarket(market.to_string()))
        }
    }

    pub fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    /// Candles spaced `step_minutes` apart whose OHLC all equal the close.
    pub fn series_from_closes(closes: &[f64], step_minutes: i64) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: t0() + chrono::Duration::minutes(step_minutes * i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect()
    }
}
