pub mod cache;
pub mod historical;
pub mod live;
pub mod orderflow;

pub use historical::HistoricalProvider;
pub use live::LiveProvider;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::types::{Candle, TimeFrame};

/// Source of candle data, historical or live.
///
/// `subscribe` hands back a channel that delivers one `(timeframe,
/// candle)` pair per *closed* candle, in timestamp order. The engine
/// drives its event loop off that receiver; `unsubscribe` tears the
/// stream down and closes the channel.
#[async_trait]
pub trait DataProvider: Send {
    /// Historical candles for the inclusive range, ascending by
    /// timestamp.
    async fn get_historical_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    async fn subscribe(
        &mut self,
        symbol: &str,
        timeframes: &[TimeFrame],
    ) -> Result<mpsc::Receiver<(TimeFrame, Candle)>>;

    async fn unsubscribe(&mut self) -> Result<()>;
}
