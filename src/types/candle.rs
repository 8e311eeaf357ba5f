use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV candle with optional orderflow data (open interest, CVD).
///
/// The range invariant `low <= min(open, close) <= max(open, close) <= high`
/// is assumed by the SL/TP logic but not enforced on construction, since
/// exchanges occasionally return noisy rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    #[serde(default)]
    pub open_interest: Decimal,
    #[serde(default)]
    pub cvd: Decimal,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            open_interest: Decimal::ZERO,
            cvd: Decimal::ZERO,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    /// Signed volume delta of this candle: volume * sign(close - open).
    pub fn volume_delta(&self) -> Decimal {
        if self.close > self.open {
            self.volume
        } else if self.close < self.open {
            -self.volume
        } else {
            Decimal::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            dec!(100),
        )
    }

    #[test]
    fn test_direction_helpers() {
        assert!(candle(dec!(100), dec!(105), dec!(99), dec!(104)).is_bullish());
        assert!(candle(dec!(100), dec!(101), dec!(95), dec!(96)).is_bearish());
        let doji = candle(dec!(100), dec!(101), dec!(99), dec!(100));
        assert!(!doji.is_bullish() && !doji.is_bearish());
    }

    #[test]
    fn test_volume_delta_sign() {
        assert_eq!(
            candle(dec!(100), dec!(105), dec!(99), dec!(104)).volume_delta(),
            dec!(100)
        );
        assert_eq!(
            candle(dec!(100), dec!(101), dec!(95), dec!(96)).volume_delta(),
            dec!(-100)
        );
        assert_eq!(
            candle(dec!(100), dec!(101), dec!(99), dec!(100)).volume_delta(),
            Decimal::ZERO
        );
    }
}
