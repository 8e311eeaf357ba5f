use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use super::executor::{build_position, resolve_close_target, ExecutionOutcome};
use super::portfolio::Portfolio;
use crate::types::{ExitReason, Position, Signal, Trade};

/// Fills signals at the candle close price with a replayed clock.
///
/// The engine sets `current_time` to the candle timestamp before each
/// execute/close cycle so entry and exit times reflect the replayed
/// data, not the wall clock. Like the paper variant, this executor
/// never mutates the portfolio.
pub struct BacktestExecutor {
    pub initial_balance: Decimal,
    pub current_time: DateTime<Utc>,
}

impl BacktestExecutor {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            // Sentinel until the engine stamps the first candle.
            current_time: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    pub fn execute(
        &self,
        signal: &Signal,
        current_price: Decimal,
        portfolio: &Portfolio,
    ) -> ExecutionOutcome {
        match signal {
            Signal::OpenLong {
                size_percent,
                stop_loss,
                take_profit,
            }
            | Signal::OpenShort {
                size_percent,
                stop_loss,
                take_profit,
            } => {
                let side = signal.side().expect("open signal has a side");
                match build_position(
                    side,
                    *size_percent,
                    *stop_loss,
                    *take_profit,
                    current_price,
                    self.current_time,
                    portfolio,
                ) {
                    Some(position) => ExecutionOutcome::Opened(position),
                    None => ExecutionOutcome::Rejected,
                }
            }
            Signal::Close { position_id } => {
                match resolve_close_target(position_id.as_deref(), portfolio) {
                    Some(position) => ExecutionOutcome::Closed(position.to_trade(
                        current_price,
                        self.current_time,
                        ExitReason::Signal,
                    )),
                    None => ExecutionOutcome::Rejected,
                }
            }
        }
    }

    pub fn close_position(
        &self,
        position: &Position,
        price: Decimal,
        reason: ExitReason,
    ) -> Trade {
        position.to_trade(price, self.current_time, reason)
    }
}
