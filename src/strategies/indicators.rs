use rust_decimal::Decimal;

use crate::types::Candle;

/// Simple moving average of close prices over the last `period` candles.
pub fn sma(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let sum: Decimal = candles[candles.len() - period..]
        .iter()
        .map(|c| c.close)
        .sum();
    Some(sum / Decimal::from(period as u64))
}

/// Relative Strength Index with Wilder smoothing. Needs at least
/// `period + 1` candles for the close-to-close deltas.
pub fn rsi(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let deltas: Vec<Decimal> = candles
        .windows(2)
        .map(|pair| pair[1].close - pair[0].close)
        .collect();

    let period_dec = Decimal::from(period as u64);
    let mut avg_gain: Decimal = deltas[..period]
        .iter()
        .map(|d| d.max(&Decimal::ZERO))
        .sum::<Decimal>()
        / period_dec;
    let mut avg_loss: Decimal = deltas[..period]
        .iter()
        .map(|d| (-*d).max(Decimal::ZERO))
        .sum::<Decimal>()
        / period_dec;

    for delta in &deltas[period..] {
        let gain = delta.max(&Decimal::ZERO);
        let loss = (-*delta).max(Decimal::ZERO);
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss) / period_dec;
    }

    if avg_loss.is_zero() {
        return Some(Decimal::from(100));
    }

    let rs = avg_gain / avg_loss;
    Some(Decimal::from(100) - Decimal::from(100) / (Decimal::ONE + rs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candles(closes: &[i64]) -> Vec<Candle> {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let close = Decimal::from(*c);
                Candle::new(
                    base + chrono::Duration::minutes(i as i64),
                    close,
                    close,
                    close,
                    close,
                    dec!(1),
                )
            })
            .collect()
    }

    #[test]
    fn test_sma() {
        let data = candles(&[1, 2, 3, 4, 5]);
        assert_eq!(sma(&data, 5), Some(dec!(3)));
        assert_eq!(sma(&data, 2), Some(dec!(4.5)));
        assert_eq!(sma(&data, 6), None);
        assert_eq!(sma(&data, 0), None);
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let data = candles(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(rsi(&data, 14), Some(dec!(100)));
    }

    #[test]
    fn test_rsi_needs_period_plus_one() {
        let data = candles(&[1, 2, 3]);
        assert_eq!(rsi(&data, 3), None);
        assert!(rsi(&data, 2).is_some());
    }

    #[test]
    fn test_rsi_balanced_moves_near_50() {
        let data = candles(&[100, 101, 100, 101, 100, 101, 100, 101, 100, 101, 100]);
        let value = rsi(&data, 4).unwrap();
        assert!(value > dec!(30) && value < dec!(70));
    }
}
