use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{Candle, ExitReason, Position, Side, TimeFrame};

/// Which exit level a candle or tick triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    StopLoss,
    TakeProfit,
}

impl From<ExitTrigger> for ExitReason {
    fn from(trigger: ExitTrigger) -> Self {
        match trigger {
            ExitTrigger::StopLoss => ExitReason::StopLoss,
            ExitTrigger::TakeProfit => ExitReason::TakeProfit,
        }
    }
}

/// Lower-timeframe candles the caller supplies for drill-down, keyed by
/// timeframe and pre-filtered to the parent candle's window. The monitor
/// trusts the provided data and does not filter by timestamp.
pub type DrillDownData = HashMap<TimeFrame, Vec<Candle>>;

/// Decides whether a candle's range hit a position's stop or target, and
/// in the ambiguous case which fired first.
///
/// Pure: never touches the portfolio. When both levels fall inside one
/// candle and no lower-timeframe data can disambiguate, the answer is
/// always `StopLoss` so backtests cannot overstate profit.
#[derive(Debug, Default)]
pub struct SlTpMonitor;

impl SlTpMonitor {
    pub fn new() -> Self {
        Self
    }

    /// Check one position against one candle.
    ///
    /// `drill_down` maps lower timeframes to the sub-candles inside this
    /// candle's window; pass `None` when unavailable.
    pub fn check(
        &self,
        position: &Position,
        candle: &Candle,
        drill_down: Option<&DrillDownData>,
        current_tf: TimeFrame,
    ) -> Option<ExitTrigger> {
        let sl_hit = sl_hit(position, candle);
        let tp_hit = tp_hit(position, candle);

        match (sl_hit, tp_hit) {
            (true, true) => Some(match drill_down {
                Some(data) => self.resolve(position, candle, data, current_tf),
                None => ExitTrigger::StopLoss,
            }),
            (true, false) => Some(ExitTrigger::StopLoss),
            (false, true) => Some(ExitTrigger::TakeProfit),
            (false, false) => None,
        }
    }

    /// Tick-level variant: a single price can hit at most one level, and
    /// if a gap crosses both, the stop wins.
    pub fn check_tick(&self, position: &Position, price: Decimal) -> Option<ExitTrigger> {
        let (sl_hit, tp_hit) = match position.side {
            Side::Long => (
                price <= position.stop_loss,
                price >= position.take_profit,
            ),
            Side::Short => (
                price >= position.stop_loss,
                price <= position.take_profit,
            ),
        };

        if sl_hit {
            Some(ExitTrigger::StopLoss)
        } else if tp_hit {
            Some(ExitTrigger::TakeProfit)
        } else {
            None
        }
    }

    /// Resolve an ambiguous candle (both levels hit) by drilling into the
    /// next-lower timeframe's sub-candles, recursing until one level fires
    /// alone or 1m is reached.
    fn resolve(
        &self,
        position: &Position,
        candle: &Candle,
        drill_down: &DrillDownData,
        current_tf: TimeFrame,
    ) -> ExitTrigger {
        self.resolve_recursive(position, candle, drill_down, current_tf)
            .unwrap_or(ExitTrigger::StopLoss)
    }

    fn resolve_recursive(
        &self,
        position: &Position,
        candle: &Candle,
        drill_down: &DrillDownData,
        current_tf: TimeFrame,
    ) -> Option<ExitTrigger> {
        let sl = sl_hit(position, candle);
        let tp = tp_hit(position, candle);

        match (sl, tp) {
            (true, true) => {
                let Some(next_tf) = current_tf.next_lower() else {
                    debug!(
                        position_id = %position.id,
                        "SL and TP both hit at 1m, assuming stop loss"
                    );
                    return Some(ExitTrigger::StopLoss);
                };

                let sub_candles = match drill_down.get(&next_tf) {
                    Some(candles) if !candles.is_empty() => candles,
                    _ => {
                        debug!(
                            position_id = %position.id,
                            timeframe = %next_tf,
                            "no sub-candles for drill-down, assuming stop loss"
                        );
                        return Some(ExitTrigger::StopLoss);
                    }
                };

                for sub in sub_candles {
                    if let Some(trigger) =
                        self.resolve_recursive(position, sub, drill_down, next_tf)
                    {
                        return Some(trigger);
                    }
                }

                // No sub-candle fired either level despite the parent
                // hitting both; take the conservative exit.
                Some(ExitTrigger::StopLoss)
            }
            (true, false) => Some(ExitTrigger::StopLoss),
            (false, true) => Some(ExitTrigger::TakeProfit),
            (false, false) => None,
        }
    }
}

fn sl_hit(position: &Position, candle: &Candle) -> bool {
    match position.side {
        Side::Long => candle.low <= position.stop_loss,
        Side::Short => candle.high >= position.stop_loss,
    }
}

fn tp_hit(position: &Position, candle: &Candle) -> bool {
    match position.side {
        Side::Long => candle.high >= position.take_profit,
        Side::Short => candle.low <= position.take_profit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn position(side: Side, stop_loss: Decimal, take_profit: Decimal) -> Position {
        Position {
            id: "pos-1".to_string(),
            side,
            entry_price: dec!(100),
            entry_time: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            size: dec!(1),
            size_usd: dec!(100),
            stop_loss,
            take_profit,
        }
    }

    fn candle(high: Decimal, low: Decimal) -> Candle {
        Candle::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            (high + low) / dec!(2),
            high,
            low,
            (high + low) / dec!(2),
            dec!(10),
        )
    }

    #[test]
    fn test_long_single_hits() {
        let monitor = SlTpMonitor::new();
        let pos = position(Side::Long, dec!(95), dec!(110));

        assert_eq!(
            monitor.check(&pos, &candle(dec!(101), dec!(94)), None, TimeFrame::M1),
            Some(ExitTrigger::StopLoss)
        );
        assert_eq!(
            monitor.check(&pos, &candle(dec!(111), dec!(99)), None, TimeFrame::M1),
            Some(ExitTrigger::TakeProfit)
        );
        assert_eq!(
            monitor.check(&pos, &candle(dec!(105), dec!(98)), None, TimeFrame::M1),
            None
        );
    }

    #[test]
    fn test_short_single_hits() {
        let monitor = SlTpMonitor::new();
        let pos = position(Side::Short, dec!(105), dec!(90));

        assert_eq!(
            monitor.check(&pos, &candle(dec!(106), dec!(99)), None, TimeFrame::M1),
            Some(ExitTrigger::StopLoss)
        );
        assert_eq!(
            monitor.check(&pos, &candle(dec!(101), dec!(89)), None, TimeFrame::M1),
            Some(ExitTrigger::TakeProfit)
        );
    }

    #[test]
    fn test_both_hit_without_drilldown_is_stop_loss() {
        let monitor = SlTpMonitor::new();
        let pos = position(Side::Long, dec!(95), dec!(108));
        let ambiguous = candle(dec!(109), dec!(94));

        assert_eq!(
            monitor.check(&pos, &ambiguous, None, TimeFrame::H4),
            Some(ExitTrigger::StopLoss)
        );
    }

    #[test]
    fn test_drilldown_resolves_take_profit_first() {
        // 4h candle hits both; the first 1h sub-candle hits only TP.
        let monitor = SlTpMonitor::new();
        let pos = position(Side::Long, dec!(95), dec!(108));
        let parent = candle(dec!(109), dec!(94));

        let mut drill_down = DrillDownData::new();
        drill_down.insert(
            TimeFrame::H1,
            vec![candle(dec!(109), dec!(96)), candle(dec!(100), dec!(94))],
        );

        assert_eq!(
            monitor.check(&pos, &parent, Some(&drill_down), TimeFrame::H4),
            Some(ExitTrigger::TakeProfit)
        );
    }

    #[test]
    fn test_drilldown_recurses_through_ambiguous_sub_candle() {
        // 4h and its first 1h sub-candle both hit both levels, but the
        // 15m data inside shows the stop firing first.
        let monitor = SlTpMonitor::new();
        let pos = position(Side::Long, dec!(95), dec!(108));
        let parent = candle(dec!(109), dec!(94));

        let mut drill_down = DrillDownData::new();
        drill_down.insert(TimeFrame::H1, vec![candle(dec!(109), dec!(94))]);
        drill_down.insert(
            TimeFrame::M15,
            vec![candle(dec!(100), dec!(94)), candle(dec!(109), dec!(99))],
        );

        assert_eq!(
            monitor.check(&pos, &parent, Some(&drill_down), TimeFrame::H4),
            Some(ExitTrigger::StopLoss)
        );
    }

    #[test]
    fn test_drilldown_missing_level_falls_back_to_stop_loss() {
        let monitor = SlTpMonitor::new();
        let pos = position(Side::Long, dec!(95), dec!(108));
        let parent = candle(dec!(109), dec!(94));
        let drill_down = DrillDownData::new();

        assert_eq!(
            monitor.check(&pos, &parent, Some(&drill_down), TimeFrame::H4),
            Some(ExitTrigger::StopLoss)
        );
    }

    #[test]
    fn test_tick_check() {
        let monitor = SlTpMonitor::new();
        let long = position(Side::Long, dec!(95), dec!(110));

        assert_eq!(monitor.check_tick(&long, dec!(94)), Some(ExitTrigger::StopLoss));
        assert_eq!(
            monitor.check_tick(&long, dec!(111)),
            Some(ExitTrigger::TakeProfit)
        );
        assert_eq!(monitor.check_tick(&long, dec!(100)), None);

        let short = position(Side::Short, dec!(105), dec!(90));
        assert_eq!(monitor.check_tick(&short, dec!(106)), Some(ExitTrigger::StopLoss));
        assert_eq!(
            monitor.check_tick(&short, dec!(89)),
            Some(ExitTrigger::TakeProfit)
        );
    }

    #[test]
    fn test_tick_gap_prefers_stop_loss() {
        // Degenerate levels where a single print crosses both.
        let monitor = SlTpMonitor::new();
        let mut pos = position(Side::Long, dec!(100), dec!(100));
        pos.stop_loss = dec!(100);
        pos.take_profit = dec!(100);
        assert_eq!(
            monitor.check_tick(&pos, dec!(100)),
            Some(ExitTrigger::StopLoss)
        );
    }
}
