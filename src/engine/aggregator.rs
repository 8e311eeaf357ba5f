use rust_decimal::Decimal;

use crate::types::{Candle, TimeFrame};

/// Completed-candle history kept per timeframe, ~1 year of 1m candles.
const MAX_HISTORY: usize = 525_600;

/// Candle data for a single timeframe: the latest (possibly in-progress)
/// candle plus completed history.
#[derive(Debug, Clone)]
pub struct TimeframeData {
    pub latest: Candle,
    pub history: Vec<Candle>,
}

/// Multi-timeframe snapshot handed to strategies on every 1m update.
///
/// One slot per supported timeframe; only the timeframes declared on the
/// aggregator are populated.
#[derive(Debug, Clone, Default)]
pub struct MultiTimeframeData {
    slots: [Option<TimeframeData>; TimeFrame::ALL.len()],
}

impl MultiTimeframeData {
    pub fn get(&self, tf: TimeFrame) -> Option<&TimeframeData> {
        self.slots[tf.index()].as_ref()
    }

    pub fn insert(&mut self, tf: TimeFrame, data: TimeframeData) {
        self.slots[tf.index()] = Some(data);
    }

    pub fn timeframes(&self) -> impl Iterator<Item = TimeFrame> + '_ {
        TimeFrame::ALL
            .into_iter()
            .filter(|tf| self.slots[tf.index()].is_some())
    }
}

/// In-progress higher-timeframe candle being built from 1m constituents.
#[derive(Debug, Clone)]
struct BuildingCandle {
    open_time: chrono::DateTime<chrono::Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    open_interest: Decimal,
    cvd: Decimal,
}

impl BuildingCandle {
    fn start(candle: &Candle) -> Self {
        Self {
            open_time: candle.timestamp,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            open_interest: candle.open_interest,
            cvd: candle.cvd,
        }
    }

    fn absorb(&mut self, candle: &Candle) {
        self.high = self.high.max(candle.high);
        self.low = self.low.min(candle.low);
        self.close = candle.close;
        self.volume += candle.volume;
        self.open_interest = candle.open_interest;
        self.cvd = candle.cvd;
    }

    fn to_candle(&self) -> Candle {
        Candle {
            timestamp: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            open_interest: self.open_interest,
            cvd: self.cvd,
        }
    }
}

/// Folds a 1m candle stream into rolling higher-timeframe histories and
/// produces a multi-timeframe snapshot on every update.
#[derive(Debug)]
pub struct TimeframeAggregator {
    timeframes: Vec<TimeFrame>,
    history: [Vec<Candle>; TimeFrame::ALL.len()],
    building: [Option<BuildingCandle>; TimeFrame::ALL.len()],
    max_history: usize,
}

impl TimeframeAggregator {
    pub fn new(timeframes: Vec<TimeFrame>) -> Self {
        Self {
            timeframes,
            history: Default::default(),
            building: Default::default(),
            max_history: MAX_HISTORY,
        }
    }

    #[cfg(test)]
    fn with_max_history(timeframes: Vec<TimeFrame>, max_history: usize) -> Self {
        let mut agg = Self::new(timeframes);
        agg.max_history = max_history;
        agg
    }

    pub fn timeframes(&self) -> &[TimeFrame] {
        &self.timeframes
    }

    /// Pre-populate histories from a batch of historical 1m candles,
    /// discarding the per-candle snapshots.
    pub fn warm_up(&mut self, candles_1m: &[Candle]) {
        for candle in candles_1m {
            self.process(candle);
        }
    }

    /// Process a new 1m candle and return the current multi-TF state.
    pub fn update(&mut self, candle_1m: &Candle) -> MultiTimeframeData {
        self.process(candle_1m);
        self.snapshot(candle_1m)
    }

    /// Completed-candle history for a timeframe (copy).
    pub fn get_history(&self, tf: TimeFrame) -> Vec<Candle> {
        self.history[tf.index()].clone()
    }

    fn process(&mut self, candle_1m: &Candle) {
        for tf in self.timeframes.clone() {
            if tf == TimeFrame::M1 {
                self.append_history(tf, candle_1m.clone());
                continue;
            }

            let slot = &mut self.building[tf.index()];
            match slot {
                Some(building) => building.absorb(candle_1m),
                None => *slot = Some(BuildingCandle::start(candle_1m)),
            }

            if tf.completes_at(candle_1m.timestamp) {
                if let Some(completed) = self.building[tf.index()].take() {
                    self.append_history(tf, completed.to_candle());
                }
            }
        }
    }

    fn append_history(&mut self, tf: TimeFrame, candle: Candle) {
        let history = &mut self.history[tf.index()];
        history.push(candle);
        if history.len() > self.max_history {
            let excess = history.len() - self.max_history;
            history.drain(..excess);
        }
    }

    fn snapshot(&self, latest_1m: &Candle) -> MultiTimeframeData {
        let mut mtf = MultiTimeframeData::default();

        for &tf in &self.timeframes {
            let history = self.history[tf.index()].clone();

            let latest = if tf == TimeFrame::M1 {
                latest_1m.clone()
            } else if let Some(building) = &self.building[tf.index()] {
                building.to_candle()
            } else if let Some(last) = history.last() {
                last.clone()
            } else {
                // No higher-TF data at all yet; degrade to the 1m candle.
                latest_1m.clone()
            };

            mtf.insert(tf, TimeframeData { latest, history });
        }

        mtf
    }
}
