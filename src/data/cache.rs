use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::types::{Candle, TimeFrame};

/// Local candle cache: one CSV file per `(symbol, timeframe)` with the
/// Candle schema. Reads return ascending series; merges deduplicate by
/// timestamp with the newer value winning, so re-fetching overlapping
/// ranges is idempotent.
const HEADERS: [&str; 8] = [
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "open_interest",
    "cvd",
];

pub fn cache_path(cache_dir: &Path, symbol: &str, timeframe: TimeFrame) -> PathBuf {
    let safe_symbol = symbol.replace(['/', ':'], "_");
    cache_dir.join(format!("{}_{}.csv", safe_symbol, timeframe.as_str()))
}

pub fn read_candles(cache_dir: &Path, symbol: &str, timeframe: TimeFrame) -> Result<Vec<Candle>> {
    let path = cache_path(cache_dir, symbol, timeframe);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(&path)?;
    let mut candles = Vec::new();
    for record in reader.records() {
        let record = record?;
        candles.push(parse_record(&record)?);
    }
    debug!("read {} candles from {}", candles.len(), path.display());
    Ok(candles)
}

pub fn write_candles(
    cache_dir: &Path,
    symbol: &str,
    timeframe: TimeFrame,
    candles: &[Candle],
) -> Result<()> {
    if candles.is_empty() {
        return Ok(());
    }

    std::fs::create_dir_all(cache_dir)?;
    let path = cache_path(cache_dir, symbol, timeframe);

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(HEADERS)?;
    for candle in candles {
        writer.write_record([
            candle.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.volume.to_string(),
            candle.open_interest.to_string(),
            candle.cvd.to_string(),
        ])?;
    }
    writer.flush()?;
    debug!("wrote {} candles to {}", candles.len(), path.display());
    Ok(())
}

/// Earliest and latest cached timestamps, or None for an empty cache.
pub fn cache_date_range(
    cache_dir: &Path,
    symbol: &str,
    timeframe: TimeFrame,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let candles = read_candles(cache_dir, symbol, timeframe)?;
    Ok(match (candles.first(), candles.last()) {
        (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
        _ => None,
    })
}

/// Merge two candle lists, deduplicating by timestamp. Entries from
/// `new` replace entries from `existing` at the same timestamp.
pub fn merge_candles(existing: Vec<Candle>, new: Vec<Candle>) -> Vec<Candle> {
    let mut by_timestamp: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
    for candle in existing {
        by_timestamp.insert(candle.timestamp, candle);
    }
    for candle in new {
        by_timestamp.insert(candle.timestamp, candle);
    }
    by_timestamp.into_values().collect()
}

fn parse_record(record: &csv::StringRecord) -> Result<Candle> {
    let field = |i: usize| -> Result<&str> {
        record
            .get(i)
            .ok_or_else(|| anyhow!("cache row missing column {i}"))
    };
    let decimal = |i: usize| -> Result<Decimal> {
        let raw = field(i)?;
        Decimal::from_str(raw).map_err(|e| anyhow!("invalid decimal '{raw}': {e}"))
    };

    let raw_ts = field(0)?;
    let timestamp = DateTime::parse_from_rfc3339(raw_ts)
        .map_err(|e| anyhow!("invalid timestamp '{raw_ts}': {e}"))?
        .with_timezone(&Utc);

    Ok(Candle {
        timestamp,
        open: decimal(1)?,
        high: decimal(2)?,
        low: decimal(3)?,
        close: decimal(4)?,
        volume: decimal(5)?,
        open_interest: decimal(6)?,
        cvd: decimal(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(minute: i64, close: Decimal) -> Candle {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut candle = Candle::new(
            base + chrono::Duration::minutes(minute),
            close,
            close + dec!(1),
            close - dec!(1),
            close,
            dec!(10),
        );
        candle.cvd = dec!(3.5);
        candle
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let candles = vec![candle(0, dec!(100)), candle(1, dec!(101.25))];

        write_candles(dir.path(), "BTC/USDT:USDT", TimeFrame::M1, &candles).unwrap();
        let loaded = read_candles(dir.path(), "BTC/USDT:USDT", TimeFrame::M1).unwrap();

        assert_eq!(loaded, candles);
    }

    #[test]
    fn test_missing_cache_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_candles(dir.path(), "BTC/USDT:USDT", TimeFrame::M1)
            .unwrap()
            .is_empty());
        assert!(cache_date_range(dir.path(), "BTC/USDT:USDT", TimeFrame::M1)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_merge_dedup_newer_wins() {
        let old = vec![candle(0, dec!(100)), candle(1, dec!(101))];
        let new = vec![candle(1, dec!(999)), candle(2, dec!(102))];

        let merged = merge_candles(old, new);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].close, dec!(999));

        // Merging the same data again changes nothing.
        let again = merge_candles(merged.clone(), merged.clone());
        assert_eq!(again, merged);
    }

    #[test]
    fn test_date_range() {
        let dir = tempfile::tempdir().unwrap();
        let candles = vec![candle(0, dec!(100)), candle(5, dec!(101))];
        write_candles(dir.path(), "BTC/USDT:USDT", TimeFrame::M1, &candles).unwrap();

        let (first, last) = cache_date_range(dir.path(), "BTC/USDT:USDT", TimeFrame::M1)
            .unwrap()
            .unwrap();
        assert_eq!(first, candles[0].timestamp);
        assert_eq!(last, candles[1].timestamp);
    }
}
