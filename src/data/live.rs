use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{DataProvider, HistoricalProvider};
use crate::config::Exchange;
use crate::types::{Candle, TimeFrame};

const BINANCE_FUTURES_WS: &str = "wss://fstream.binance.com";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const BACKOFF_MULTIPLIER: u32 = 2;
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Streams live kline data from the Binance futures WebSocket.
///
/// `subscribe` spawns a connection task that forwards one `(timeframe,
/// candle)` pair per closed kline into the returned channel. The task
/// reconnects with exponential backoff and gives up (closing the
/// channel) after ten consecutive failures. Per-timeframe CVD
/// accumulators live inside the task so they survive reconnects and
/// reset only on `unsubscribe`.
pub struct LiveProvider {
    exchange: Exchange,
    cache_dir: PathBuf,
    running: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl LiveProvider {
    pub fn new(exchange: Exchange, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        if exchange != Exchange::Binance {
            bail!("unsupported exchange for the live data adapter: {exchange}");
        }
        Ok(Self {
            exchange,
            cache_dir: cache_dir.into(),
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }
}

fn stream_symbol(symbol: &str) -> String {
    let base = symbol.split(':').next().unwrap_or(symbol);
    base.replace('/', "").to_lowercase()
}

fn build_ws_url(symbol: &str, timeframes: &[TimeFrame]) -> String {
    let streams: Vec<String> = timeframes
        .iter()
        .map(|tf| format!("{}@kline_{}", stream_symbol(symbol), tf.as_str()))
        .collect();

    if streams.len() == 1 {
        format!("{}/ws/{}", BINANCE_FUTURES_WS, streams[0])
    } else {
        format!("{}/stream?streams={}", BINANCE_FUTURES_WS, streams.join("/"))
    }
}

#[derive(Debug, Deserialize)]
struct CombinedStreamMessage {
    #[allow(dead_code)]
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time_ms: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Parse a kline frame into `(timeframe, candle, is_closed)`. The
/// candle's `cvd` carries only this candle's signed delta; the
/// connection task folds it into the running accumulator.
fn parse_kline_message(text: &str) -> Option<(TimeFrame, Candle, bool)> {
    let event: KlineEvent = match serde_json::from_str::<CombinedStreamMessage>(text) {
        Ok(combined) => serde_json::from_value(combined.data).ok()?,
        Err(_) => serde_json::from_str(text).ok()?,
    };

    if event.event_type != "kline" {
        return None;
    }

    let kline = event.kline;
    let timeframe = TimeFrame::parse(&kline.interval).ok()?;
    let timestamp = Utc.timestamp_millis_opt(kline.open_time_ms).single()?;

    let mut candle = Candle::new(
        timestamp,
        Decimal::from_str(&kline.open).ok()?,
        Decimal::from_str(&kline.high).ok()?,
        Decimal::from_str(&kline.low).ok()?,
        Decimal::from_str(&kline.close).ok()?,
        Decimal::from_str(&kline.volume).ok()?,
    );
    candle.cvd = candle.volume_delta();

    Some((timeframe, candle, kline.is_closed))
}

async fn run_connection(
    url: &str,
    tx: &mpsc::Sender<(TimeFrame, Candle)>,
    running: &AtomicBool,
    cvd_accumulator: &mut HashMap<TimeFrame, Decimal>,
) -> Result<()> {
    let (ws_stream, _) = connect_async(url).await?;
    let (mut write, mut read) = ws_stream.split();
    info!("websocket connected to {}", url);

    while let Some(message) = read.next().await {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        match message {
            Ok(Message::Text(text)) => {
                let Some((timeframe, mut candle, is_closed)) = parse_kline_message(&text) else {
                    continue;
                };
                if !is_closed {
                    continue;
                }

                let cumulative = cvd_accumulator.entry(timeframe).or_insert(Decimal::ZERO);
                *cumulative += candle.cvd;
                candle.cvd = *cumulative;

                debug!(
                    "candle closed: {} {} C={} V={} CVD={}",
                    timeframe, candle.timestamp, candle.close, candle.volume, candle.cvd
                );

                if tx.send((timeframe, candle)).await.is_err() {
                    // Receiver dropped; nothing left to feed.
                    return Ok(());
                }
            }
            Ok(Message::Ping(payload)) => {
                write.send(Message::Pong(payload)).await.ok();
            }
            Ok(Message::Close(_)) => {
                info!("websocket closed by server");
                break;
            }
            Err(e) => {
                error!("websocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

#[async_trait]
impl DataProvider for LiveProvider {
    async fn get_historical_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        // Warm-up data comes from the REST adapter; the live provider
        // only owns the stream.
        let historical = HistoricalProvider::new(self.exchange, self.cache_dir.clone())?;
        historical
            .get_historical_candles(symbol, timeframe, start, end)
            .await
    }

    async fn subscribe(
        &mut self,
        symbol: &str,
        timeframes: &[TimeFrame],
    ) -> Result<mpsc::Receiver<(TimeFrame, Candle)>> {
        if timeframes.is_empty() {
            bail!("no timeframes to subscribe to");
        }

        let url = build_ws_url(symbol, timeframes);
        info!(
            "subscribing to live kline streams: {} (symbol={}, timeframes={:?})",
            url,
            symbol,
            timeframes.iter().map(|tf| tf.as_str()).collect::<Vec<_>>()
        );

        let (tx, rx) = mpsc::channel(1000);
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);

        let task = tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            let mut consecutive_failures = 0u32;
            // Survives reconnects; cleared only when this task ends.
            let mut cvd_accumulator: HashMap<TimeFrame, Decimal> = HashMap::new();

            while running.load(Ordering::SeqCst) {
                match run_connection(&url, &tx, &running, &mut cvd_accumulator).await {
                    Ok(()) => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        consecutive_failures += 1;
                        warn!("websocket stream ended, reconnecting...");
                    }
                    Err(e) => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        consecutive_failures += 1;
                        warn!(
                            "websocket error: {}. reconnecting in {:?} (attempt {}/{})",
                            e, backoff, consecutive_failures, MAX_CONSECUTIVE_FAILURES
                        );
                    }
                }

                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    error!(
                        "max consecutive failures ({}) reached, stopping live stream",
                        MAX_CONSECUTIVE_FAILURES
                    );
                    break;
                }

                tokio::time::sleep(backoff).await;
                backoff = (backoff * BACKOFF_MULTIPLIER).min(MAX_BACKOFF);
            }

            running.store(false, Ordering::SeqCst);
            info!("live data stream stopped");
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        info!("unsubscribed from live data");
        Ok(())
    }
}
