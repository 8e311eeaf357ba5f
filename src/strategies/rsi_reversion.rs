use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use super::indicators::rsi;
use super::Strategy;
use crate::engine::aggregator::MultiTimeframeData;
use crate::engine::portfolio::Portfolio;
use crate::types::{Side, Signal, TimeFrame};

/// RSI overbought/oversold mean reversion.
///
/// Longs when RSI drops below the oversold threshold, shorts when it
/// rises above the overbought threshold, closing the opposite side
/// first. Entries are edge-triggered on the threshold crossing so a
/// persistent extreme does not re-fire every candle.
#[derive(Debug)]
pub struct RsiReversion {
    pub period: usize,
    pub oversold: Decimal,
    pub overbought: Decimal,
    pub size_percent: Decimal,
    pub sl_percent: Decimal,
    pub tp_percent: Decimal,
    prev_rsi: Option<Decimal>,
}

impl Default for RsiReversion {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: dec!(30),
            overbought: dec!(70),
            size_percent: dec!(0.5),
            sl_percent: dec!(2),
            tp_percent: dec!(4),
            prev_rsi: None,
        }
    }
}

impl Strategy for RsiReversion {
    fn name(&self) -> &'static str {
        "RsiReversion"
    }

    fn on_candle(&mut self, data: &MultiTimeframeData, portfolio: &Portfolio) -> Vec<Signal> {
        let Some(m1) = data.get(TimeFrame::M1) else {
            return Vec::new();
        };
        let price = m1.latest.close;

        let Some(value) = rsi(&m1.history, self.period) else {
            return Vec::new();
        };

        let mut signals = Vec::new();

        if let Some(prev) = self.prev_rsi {
            let dropped_oversold = prev >= self.oversold && value < self.oversold;
            let rose_overbought = prev <= self.overbought && value > self.overbought;

            if dropped_oversold {
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
            } else if rose_overbought {
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

        self.prev_rsi = Some(value);
        signals
    }

    fn get_state(&self) -> Value {
        json!({ "prev_rsi": self.prev_rsi.map(|d| d.to_string()) })
    }

    fn set_state(&mut self, state: &Value) {
        self.prev_rsi = state
            .get("prev_rsi")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok());
    }
}
