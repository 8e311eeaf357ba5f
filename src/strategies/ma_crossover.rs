use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use super::indicators::sma;
use super::Strategy;
use crate::engine::aggregator::MultiTimeframeData;
use crate::engine::portfolio::Portfolio;
use crate::types::{Side, Signal, TimeFrame};

/// Simple moving average crossover.
///
/// Opens a long when the fast SMA crosses above the slow SMA, a short
/// when it crosses below, closing any opposite-side position first.
#[derive(Debug)]
pub struct MaCrossover {
    pub fast_period: usize,
    pub slow_period: usize,
    pub size_percent: Decimal,
    pub sl_percent: Decimal,
    pub tp_percent: Decimal,
    prev_fast: Option<Decimal>,
    prev_slow: Option<Decimal>,
}

impl Default for MaCrossover {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 30,
            size_percent: dec!(1),
            sl_percent: dec!(2),
            tp_percent: dec!(4),
            prev_fast: None,
            prev_slow: None,
        }
    }
}

impl Strategy for MaCrossover {
    fn name(&self) -> &'static str {
        "MaCrossover"
    }

    fn on_candle(&mut self, data: &MultiTimeframeData, portfolio: &Portfolio) -> Vec<Signal> {
        let Some(m1) = data.get(TimeFrame::M1) else {
            return Vec::new();
        };
        let price = m1.latest.close;

        let (Some(fast), Some(slow)) = (
            sma(&m1.history, self.fast_period),
            sma(&m1.history, self.slow_period),
        ) else {
            return Vec::new();
        };

        let mut signals = Vec::new();

        if let (Some(prev_fast), Some(prev_slow)) = (self.prev_fast, self.prev_slow) {
            let crossed_above = prev_fast <= prev_slow && fast > slow;
            let crossed_below = prev_fast >= prev_slow && fast < slow;

            if crossed_above {
                for position in &portfolio.positions {
                    if position.side == Side::Short {
                        signals.push(Signal::close(Some(position.id.clone())));
                    }
                }
                signals.push(Signal::open_long(
                    self.size_percent,
                    price * (Decimal::ONE - self.sl_percent / dec!(100)),
                    price * (Decimal::ONE + self.tp_percent / dec!(100)),
                ));
            } else if crossed_below {
                for position in &portfolio.positions {
                    if position.side == Side::Long {
                        signals.push(Signal::close(Some(position.id.clone())));
                    }
                }
                signals.push(Signal::open_short(
                    self.size_percent,
                    price * (Decimal::ONE + self.sl_percent / dec!(100)),
                    price * (Decimal::ONE - self.tp_percent / dec!(100)),
                ));
            }
        }

        self.prev_fast = Some(fast);
        self.prev_slow = Some(slow);
        signals
    }

    fn get_state(&self) -> Value {
        json!({
            "prev_fast": self.prev_fast.map(|d| d.to_string()),
            "prev_slow": self.prev_slow.map(|d| d.to_string()),
        })
    }

    fn set_state(&mut self, state: &Value) {
        self.prev_fast = parse_decimal(state, "prev_fast");
        self.prev_slow = parse_decimal(state, "prev_slow");
    }
}

fn parse_decimal(state: &Value, key: &str) -> Option<Decimal> {
    state.get(key)?.as_str()?.parse().ok()
}
