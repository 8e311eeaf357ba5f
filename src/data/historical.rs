use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{cache, orderflow, DataProvider};
use crate::config::Exchange;
use crate::types::{Candle, TimeFrame};

const MAX_CANDLES_PER_REQUEST: u32 = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONSECUTIVE_RETRIES: u32 = 5;
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);
const NETWORK_BACKOFF: Duration = Duration::from_secs(3);

/// Fetches historical candles over REST with pagination, extending the
/// local cache so already-fetched ranges are never re-downloaded.
pub struct HistoricalProvider {
    exchange: Exchange,
    cache_dir: PathBuf,
    client: reqwest::Client,
}

impl HistoricalProvider {
    pub fn new(exchange: Exchange, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        // The adapter speaks the Binance futures and Bybit v5 kline
        // dialects; other configured exchanges are rejected here.
        if exchange == Exchange::Hyperliquid {
            bail!("unsupported exchange for the historical data adapter: {exchange}");
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            exchange,
            cache_dir: cache_dir.into(),
            client,
        })
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>> {
        let mut all_candles = Vec::new();
        let mut since = start_ms;
        let tf_ms = timeframe.milliseconds();
        let mut retries = 0u32;

        info!(
            "fetching {} {} candles from {} to {}",
            symbol,
            timeframe,
            Utc.timestamp_millis_opt(start_ms).unwrap(),
            Utc.timestamp_millis_opt(end_ms).unwrap(),
        );

        while since < end_ms {
            let batch = match self.fetch_klines(symbol, timeframe, since, end_ms).await {
                Ok(batch) => {
                    retries = 0;
                    batch
                }
                Err(FetchError::RateLimited) => {
                    retries += 1;
                    if retries > MAX_CONSECUTIVE_RETRIES {
                        bail!("rate limit retry budget exhausted fetching {symbol}");
                    }
                    warn!("rate limited, waiting {:?}...", RATE_LIMIT_BACKOFF);
                    tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                    continue;
                }
                Err(FetchError::Network(e)) => {
                    retries += 1;
                    if retries > MAX_CONSECUTIVE_RETRIES {
                        bail!("network retry budget exhausted fetching {symbol}: {e}");
                    }
                    warn!("network error: {e}, retrying in {:?}...", NETWORK_BACKOFF);
                    tokio::time::sleep(NETWORK_BACKOFF).await;
                    continue;
                }
                Err(FetchError::Fatal(e)) => return Err(e),
            };

            if batch.is_empty() {
                break;
            }

            let last_ts = batch
                .last()
                .map(|c| c.timestamp.timestamp_millis())
                .unwrap_or(since);

            for candle in batch {
                if candle.timestamp.timestamp_millis() > end_ms {
                    break;
                }
                all_candles.push(candle);
            }

            since = last_ts + tf_ms;
            debug!(
                "fetched up to {}",
                Utc.timestamp_millis_opt(last_ts).unwrap()
            );
        }

        info!("total fetched: {} candles", all_candles.len());
        Ok(all_candles)
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start_ms: i64,
        end_ms: i64,
    ) -> std::result::Result<Vec<Candle>, FetchError> {
        let url = match self.exchange {
            Exchange::Binance => format!(
                "https://fapi.binance.com/fapi/v1/klines?symbol={}&interval={}&startTime={}&endTime={}&limit={}",
                rest_symbol(symbol),
                timeframe.as_str(),
                start_ms,
                end_ms,
                MAX_CANDLES_PER_REQUEST
            ),
            Exchange::Bybit => format!(
                "https://api.bybit.com/v5/market/kline?category=linear&symbol={}&interval={}&start={}&end={}&limit={}",
                rest_symbol(symbol),
                bybit_interval(timeframe),
                start_ms,
                end_ms,
                MAX_CANDLES_PER_REQUEST
            ),
            Exchange::Hyperliquid => {
                return Err(FetchError::Fatal(anyhow!(
                    "unsupported exchange: hyperliquid"
                )))
            }
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network(anyhow!(e)))?;

        if response.status().as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(FetchError::Fatal(anyhow!(
                "kline request failed with status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Network(anyhow!(e)))?;

        match self.exchange {
            Exchange::Binance => parse_binance_klines(&body).map_err(FetchError::Fatal),
            Exchange::Bybit => parse_bybit_klines(&body).map_err(FetchError::Fatal),
            Exchange::Hyperliquid => unreachable!(),
        }
    }
}

enum FetchError {
    RateLimited,
    Network(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Convert a ccxt-style symbol to the exchange REST symbol:
/// `BTC/USDT:USDT` -> `BTCUSDT`.
fn rest_symbol(symbol: &str) -> String {
    let base = symbol.split(':').next().unwrap_or(symbol);
    base.replace('/', "").to_uppercase()
}

fn bybit_interval(timeframe: TimeFrame) -> &'static str {
    match timeframe {
        TimeFrame::M1 => "1",
        TimeFrame::M5 => "5",
        TimeFrame::M15 => "15",
        TimeFrame::H1 => "60",
        TimeFrame::H4 => "240",
        TimeFrame::D1 => "D",
        TimeFrame::W1 => "W",
    }
}

/// Binance klines: array of arrays
/// `[open_time, "open", "high", "low", "close", "volume", ...]`.
fn parse_binance_klines(body: &Value) -> Result<Vec<Candle>> {
    let rows = body
        .as_array()
        .ok_or_else(|| anyhow!("unexpected kline response shape"))?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let row = row
            .as_array()
            .ok_or_else(|| anyhow!("unexpected kline row shape"))?;
        let ts_ms = row
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("kline row missing open time"))?;
        candles.push(Candle::new(
            Utc.timestamp_millis_opt(ts_ms)
                .single()
                .ok_or_else(|| anyhow!("invalid kline timestamp {ts_ms}"))?,
            value_decimal(row.get(1))?,
            value_decimal(row.get(2))?,
            value_decimal(row.get(3))?,
            value_decimal(row.get(4))?,
            value_decimal(row.get(5))?,
        ));
    }
    Ok(candles)
}

/// Bybit v5 klines: `result.list` of
/// `["ts_ms", "open", "high", "low", "close", "volume", "turnover"]`,
/// newest first.
fn parse_bybit_klines(body: &Value) -> Result<Vec<Candle>> {
    let ret_code = body.get("retCode").and_then(Value::as_i64).unwrap_or(-1);
    if ret_code != 0 {
        bail!(
            "bybit kline error: {}",
            body.get("retMsg").and_then(Value::as_str).unwrap_or("?")
        );
    }

    let rows = body
        .pointer("/result/list")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("unexpected bybit kline response shape"))?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows.iter().rev() {
        let row = row
            .as_array()
            .ok_or_else(|| anyhow!("unexpected bybit kline row shape"))?;
        let ts_ms: i64 = row
            .first()
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("bybit kline row missing timestamp"))?;
        candles.push(Candle::new(
            Utc.timestamp_millis_opt(ts_ms)
                .single()
                .ok_or_else(|| anyhow!("invalid kline timestamp {ts_ms}"))?,
            value_decimal(row.get(1))?,
            value_decimal(row.get(2))?,
            value_decimal(row.get(3))?,
            value_decimal(row.get(4))?,
            value_decimal(row.get(5))?,
        ));
    }
    Ok(candles)
}

fn value_decimal(value: Option<&Value>) -> Result<Decimal> {
    let raw = value
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("kline row missing price field"))?;
    Decimal::from_str(raw).map_err(|e| anyhow!("invalid decimal '{raw}': {e}"))
}

fn filter_range(candles: Vec<Candle>, start_ms: i64, end_ms: i64) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| {
            let ts = c.timestamp.timestamp_millis();
            ts >= start_ms && ts <= end_ms
        })
        .collect()
}

#[async_trait]
impl DataProvider for HistoricalProvider {
    async fn get_historical_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();

        let cached = cache::read_candles(&self.cache_dir, symbol, timeframe)?;

        if !cached.is_empty() {
            let cache_start_ms = cached[0].timestamp.timestamp_millis();
            let cache_end_ms = cached[cached.len() - 1].timestamp.timestamp_millis();

            let mut fetch_ranges: Vec<(i64, i64)> = Vec::new();
            if start_ms < cache_start_ms {
                fetch_ranges.push((start_ms, cache_start_ms));
            }
            if end_ms > cache_end_ms {
                fetch_ranges.push((cache_end_ms, end_ms));
            }

            if fetch_ranges.is_empty() {
                return Ok(filter_range(cached, start_ms, end_ms));
            }

            let mut new_candles = Vec::new();
            for (range_start, range_end) in fetch_ranges {
                new_candles
                    .extend(self.fetch_range(symbol, timeframe, range_start, range_end).await?);
            }

            let merged = cache::merge_candles(cached, new_candles);
            let merged = orderflow::approximate_cvd(merged);
            cache::write_candles(&self.cache_dir, symbol, timeframe, &merged)?;
            return Ok(filter_range(merged, start_ms, end_ms));
        }

        let fetched = self.fetch_range(symbol, timeframe, start_ms, end_ms).await?;
        let fetched = orderflow::approximate_cvd(fetched);
        cache::write_candles(&self.cache_dir, symbol, timeframe, &fetched)?;
        Ok(filter_range(fetched, start_ms, end_ms))
    }

    async fn subscribe(
        &mut self,
        _symbol: &str,
        _timeframes: &[TimeFrame],
    ) -> Result<mpsc::Receiver<(TimeFrame, Candle)>> {
        bail!("historical provider does not support live subscriptions")
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rest_symbol_conversion() {
        assert_eq!(rest_symbol("BTC/USDT:USDT"), "BTCUSDT");
        assert_eq!(rest_symbol("eth/usdt"), "ETHUSDT");
        assert_eq!(rest_symbol("BTCUSDT"), "BTCUSDT");
    }

    #[test]
    fn test_parse_binance_klines() {
        let body = json!([
            [1717200000000i64, "100.5", "101", "99.5", "100.75", "12.5", 1717200059999i64],
            [1717200060000i64, "100.75", "102", "100", "101.5", "8", 1717200119999i64]
        ]);
        let candles = parse_binance_klines(&body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open.to_string(), "100.5");
        assert_eq!(candles[1].close.to_string(), "101.5");
        assert!(candles[0].timestamp < candles[1].timestamp);
    }

    #[test]
    fn test_parse_bybit_klines_reverses_order() {
        let body = json!({
            "retCode": 0,
            "result": {
                "list": [
                    ["1717200060000", "100.75", "102", "100", "101.5", "8", "810"],
                    ["1717200000000", "100.5", "101", "99.5", "100.75", "12.5", "1255"]
                ]
            }
        });
        let candles = parse_bybit_klines(&body).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].timestamp < candles[1].timestamp);
        assert_eq!(candles[0].open.to_string(), "100.5");
    }

    #[test]
    fn test_parse_bybit_error_code() {
        let body = json!({"retCode": 10001, "retMsg": "params error"});
        assert!(parse_bybit_klines(&body).is_err());
    }

    #[test]
    fn test_hyperliquid_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HistoricalProvider::new(Exchange::Hyperliquid, dir.path()).is_err());
        assert!(HistoricalProvider::new(Exchange::Binance, dir.path()).is_ok());
    }
}
