use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfigError;

/// Supported candle timeframes, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
    W1,
}

impl TimeFrame {
    pub const ALL: [TimeFrame; 7] = [
        TimeFrame::M1,
        TimeFrame::M5,
        TimeFrame::M15,
        TimeFrame::H1,
        TimeFrame::H4,
        TimeFrame::D1,
        TimeFrame::W1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "1m",
            TimeFrame::M5 => "5m",
            TimeFrame::M15 => "15m",
            TimeFrame::H1 => "1h",
            TimeFrame::H4 => "4h",
            TimeFrame::D1 => "1d",
            TimeFrame::W1 => "1w",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "1m" => Ok(TimeFrame::M1),
            "5m" => Ok(TimeFrame::M5),
            "15m" => Ok(TimeFrame::M15),
            "1h" => Ok(TimeFrame::H1),
            "4h" => Ok(TimeFrame::H4),
            "1d" => Ok(TimeFrame::D1),
            "1w" => Ok(TimeFrame::W1),
            other => Err(ConfigError::UnknownTimeframe(other.to_string())),
        }
    }

    pub fn minutes(&self) -> u32 {
        match self {
            TimeFrame::M1 => 1,
            TimeFrame::M5 => 5,
            TimeFrame::M15 => 15,
            TimeFrame::H1 => 60,
            TimeFrame::H4 => 240,
            TimeFrame::D1 => 1440,
            TimeFrame::W1 => 10080,
        }
    }

    pub fn milliseconds(&self) -> i64 {
        self.minutes() as i64 * 60_000
    }

    /// The next lower timeframe, or None at 1m.
    pub fn next_lower(&self) -> Option<TimeFrame> {
        let idx = Self::ALL.iter().position(|tf| tf == self)?;
        if idx == 0 {
            None
        } else {
            Some(Self::ALL[idx - 1])
        }
    }

    /// Index into per-timeframe slot arrays.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|tf| tf == self).unwrap_or(0)
    }

    /// Whether a 1m candle with this timestamp is the last minute of this
    /// timeframe's bucket, in wall-clock UTC.
    ///
    /// A 5m candle completes on minutes 4, 9, 14...; a 4h candle at
    /// 03:59, 07:59, ...; a daily at 23:59; a weekly at Sunday 23:59.
    pub fn completes_at(&self, timestamp: DateTime<Utc>) -> bool {
        match self {
            TimeFrame::M1 => true,
            TimeFrame::W1 => {
                timestamp.weekday() == Weekday::Sun
                    && timestamp.hour() == 23
                    && timestamp.minute() == 59
            }
            TimeFrame::D1 => timestamp.hour() == 23 && timestamp.minute() == 59,
            _ => {
                let minute_of_day = timestamp.hour() * 60 + timestamp.minute();
                (minute_of_day + 1) % self.minutes() == 0
            }
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
