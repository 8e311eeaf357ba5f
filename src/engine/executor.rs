use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::backtest::BacktestExecutor;
use super::paper::PaperExecutor;
use super::portfolio::Portfolio;
use crate::types::{ExitReason, Position, Side, Signal, Trade};

/// Result of executing a single signal.
///
/// Executors return outcomes; the engine performs all portfolio
/// mutation, persistence, and alerting after receiving them.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Opened(Position),
    Closed(Trade),
    Rejected,
}

/// The two execution variants behind one closed dispatch surface.
///
/// The backtest variant carries a mutable `current_time` that the engine
/// stamps with the candle timestamp before each execute/close cycle; the
/// paper variant stamps wall-clock UTC.
pub enum TradeExecutor {
    Backtest(BacktestExecutor),
    Paper(PaperExecutor),
}

impl TradeExecutor {
    pub fn initial_balance(&self) -> Decimal {
        match self {
            TradeExecutor::Backtest(executor) => executor.initial_balance,
            TradeExecutor::Paper(executor) => executor.initial_balance,
        }
    }

    /// Stamp the simulated clock; a no-op for the paper variant.
    pub fn set_current_time(&mut self, time: DateTime<Utc>) {
        if let TradeExecutor::Backtest(executor) = self {
            executor.current_time = time;
        }
    }

    pub fn execute(
        &self,
        signal: &Signal,
        current_price: Decimal,
        portfolio: &Portfolio,
    ) -> ExecutionOutcome {
        match self {
            TradeExecutor::Backtest(executor) => {
                executor.execute(signal, current_price, portfolio)
            }
            TradeExecutor::Paper(executor) => executor.execute(signal, current_price, portfolio),
        }
    }

    pub fn close_position(
        &self,
        position: &Position,
        price: Decimal,
        reason: ExitReason,
    ) -> Trade {
        match self {
            TradeExecutor::Backtest(executor) => executor.close_position(position, price, reason),
            TradeExecutor::Paper(executor) => executor.close_position(position, price, reason),
        }
    }
}

/// Shared open-signal validation and sizing, identical for both
/// executor variants.
///
/// Sizing is equity-based so unrealized PnL at the current price counts,
/// but the notional must fit in free cash (no fractional reserve).
pub(super) fn build_position(
    side: Side,
    size_percent: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    current_price: Decimal,
    entry_time: DateTime<Utc>,
    portfolio: &Portfolio,
) -> Option<Position> {
    let size_usd = portfolio.equity() * size_percent;
    if size_usd <= Decimal::ZERO {
        warn!("rejecting open signal: zero or negative size");
        return None;
    }

    if size_usd > portfolio.balance {
        warn!(
            "rejecting open signal: insufficient balance (need {:.2}, have {:.2})",
            size_usd, portfolio.balance
        );
        return None;
    }

    if current_price <= Decimal::ZERO {
        warn!("rejecting open signal: invalid price {}", current_price);
        return None;
    }

    let size = size_usd / current_price;

    Some(Position {
        id: Position::generate_id(),
        side,
        entry_price: current_price,
        entry_time,
        size,
        size_usd,
        stop_loss,
        take_profit,
    })
}

/// Shared close-signal resolution: a specific position by id, else the
/// first open position, else nothing to close.
///
/// A close for an id that is no longer open (e.g. the stop already
/// fired on this candle) is a quiet no-op.
pub(super) fn resolve_close_target<'a>(
    position_id: Option<&str>,
    portfolio: &'a Portfolio,
) -> Option<&'a Position> {
    match position_id {
        Some(id) => {
            let found = portfolio.get_position(id);
            if found.is_none() {
                debug!("close signal for unknown or already-closed position: {}", id);
            }
            found
        }
        None => portfolio.positions.first(),
    }
}
