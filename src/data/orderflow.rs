use rust_decimal::Decimal;

use crate::types::Candle;

/// Fill in approximate cumulative volume delta for a candle series.
///
/// Per candle the delta is `volume * sign(close - open)`; CVD is the
/// running sum. Candles that already carry CVD (e.g. merged from a
/// previous enrichment pass) keep their value and re-seed the
/// accumulator so the series stays continuous.
pub fn approximate_cvd(candles: Vec<Candle>) -> Vec<Candle> {
    let mut cumulative = Decimal::ZERO;
    candles
        .into_iter()
        .map(|mut candle| {
            if !candle.cvd.is_zero() {
                cumulative = candle.cvd;
                return candle;
            }
            cumulative += candle.volume_delta();
            candle.cvd = cumulative;
            candle
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(minute: i64, open: Decimal, close: Decimal, volume: Decimal) -> Candle {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        Candle::new(
            base + chrono::Duration::minutes(minute),
            open,
            open.max(close),
            open.min(close),
            close,
            volume,
        )
    }

    #[test]
    fn test_cvd_accumulates_signed_volume() {
        let candles = vec![
            candle(0, dec!(100), dec!(101), dec!(10)), // +10
            candle(1, dec!(101), dec!(100), dec!(4)),  // -4
            candle(2, dec!(100), dec!(100), dec!(7)),  // 0
        ];
        let enriched = approximate_cvd(candles);
        assert_eq!(enriched[0].cvd, dec!(10));
        assert_eq!(enriched[1].cvd, dec!(6));
        assert_eq!(enriched[2].cvd, dec!(6));
    }

    #[test]
    fn test_existing_cvd_reseeds_accumulator() {
        let mut seeded = candle(0, dec!(100), dec!(101), dec!(10));
        seeded.cvd = dec!(50);
        let candles = vec![seeded, candle(1, dec!(101), dec!(102), dec!(5))];

        let enriched = approximate_cvd(candles);
        assert_eq!(enriched[0].cvd, dec!(50));
        assert_eq!(enriched[1].cvd, dec!(55));
    }
}
