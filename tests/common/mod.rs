// Shared fixtures; each integration test binary uses its own subset.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use perpbot::data::DataProvider;
use perpbot::engine::{MultiTimeframeData, Portfolio};
use perpbot::strategies::Strategy;
use perpbot::types::{Candle, Signal, TimeFrame};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
}

/// Sequential 1m candles at a flat close price with a tight range.
pub fn flat_candles(count: usize, close: Decimal) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            Candle::new(
                base_time() + chrono::Duration::minutes(i as i64),
                close,
                close + dec!(0.25),
                close - dec!(0.25),
                close,
                dec!(100),
            )
        })
        .collect()
}

/// Historical provider that replays a canned candle list.
pub struct CannedProvider {
    pub candles: Vec<Candle>,
}

#[async_trait]
impl DataProvider for CannedProvider {
    async fn get_historical_candles(
        &self,
        _symbol: &str,
        _timeframe: TimeFrame,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        Ok(self.candles.clone())
    }

    async fn subscribe(
        &mut self,
        _symbol: &str,
        _timeframes: &[TimeFrame],
    ) -> Result<mpsc::Receiver<(TimeFrame, Candle)>> {
        bail!("canned provider does not support live subscriptions")
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Live provider that serves canned warm-up history and then feeds the
/// live candles into the subscription channel, closing it afterwards.
pub struct CannedLiveProvider {
    pub warm_up: Vec<Candle>,
    pub live: Vec<Candle>,
}

#[async_trait]
impl DataProvider for CannedLiveProvider {
    async fn get_historical_candles(
        &self,
        _symbol: &str,
        _timeframe: TimeFrame,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        Ok(self.warm_up.clone())
    }

    async fn subscribe(
        &mut self,
        _symbol: &str,
        _timeframes: &[TimeFrame],
    ) -> Result<mpsc::Receiver<(TimeFrame, Candle)>> {
        let (tx, rx) = mpsc::channel(self.live.len().max(1));
        for candle in &self.live {
            tx.send((TimeFrame::M1, candle.clone())).await.ok();
        }
        // Dropping the sender ends the stream after the buffered
        // candles are consumed.
        Ok(rx)
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens one position on the first candle it sees, sized and levelled
/// relative to that candle's close, then idles.
#[derive(Debug)]
pub struct OpenOnce {
    pub size_percent: Decimal,
    pub sl_factor: Decimal,
    pub tp_factor: Decimal,
    pub short: bool,
    opened: bool,
}

impl OpenOnce {
    pub fn long(size_percent: Decimal, sl_factor: Decimal, tp_factor: Decimal) -> Self {
        Self {
            size_percent,
            sl_factor,
            tp_factor,
            short: false,
            opened: false,
        }
    }

    pub fn short(size_percent: Decimal, sl_factor: Decimal, tp_factor: Decimal) -> Self {
        Self {
            size_percent,
            sl_factor,
            tp_factor,
            short: true,
            opened: false,
        }
    }
}

impl Strategy for OpenOnce {
    fn name(&self) -> &'static str {
        "OpenOnce"
    }

    fn on_candle(&mut self, data: &MultiTimeframeData, portfolio: &Portfolio) -> Vec<Signal> {
        if self.opened || portfolio.has_position() {
            return Vec::new();
        }
        self.opened = true;
        let price = data
            .get(TimeFrame::M1)
            .map(|tf| tf.latest.close)
            .unwrap_or(Decimal::ONE);
        let signal = if self.short {
            Signal::open_short(
                self.size_percent,
                price * self.sl_factor,
                price * self.tp_factor,
            )
        } else {
            Signal::open_long(
                self.size_percent,
                price * self.sl_factor,
                price * self.tp_factor,
            )
        };
        vec![signal]
    }
}
