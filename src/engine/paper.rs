use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

use super::executor::{build_position, resolve_close_target, ExecutionOutcome};
use super::portfolio::Portfolio;
use super::sl_tp::{ExitTrigger, SlTpMonitor};
use crate::types::{ExitReason, Position, Signal, Trade};

/// Position lifecycle events surfaced to the forward-test caller.
#[derive(Debug, Clone)]
pub enum PositionEvent {
    Opened(Position),
    ClosedSignal(Trade),
    ClosedStopLoss(Trade),
    ClosedTakeProfit(Trade),
}

pub type PositionChangeCallback = Box<dyn Fn(&PositionEvent) + Send + Sync>;

/// Simulated order execution for forward (paper) testing.
///
/// Differences from the backtest variant: fills stamp wall-clock UTC,
/// and `check_price_update` provides tick-level SL/TP monitoring. That
/// one method closes triggered positions on the portfolio directly --
/// tick monitoring must be coupled to execution so a stop cannot re-fire
/// on the next tick before the engine has seen the trade. Everything
/// else returns outcomes and leaves portfolio mutation to the engine.
pub struct PaperExecutor {
    pub initial_balance: Decimal,
    monitor: SlTpMonitor,
    on_position_change: Option<PositionChangeCallback>,
}

impl PaperExecutor {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            monitor: SlTpMonitor::new(),
            on_position_change: None,
        }
    }

    pub fn with_position_callback(mut self, callback: PositionChangeCallback) -> Self {
        self.on_position_change = Some(callback);
        self
    }

    fn notify(&self, event: PositionEvent) {
        if let Some(callback) = &self.on_position_change {
            callback(&event);
        }
    }

    fn close_event(trigger_reason: ExitReason, trade: Trade) -> PositionEvent {
        match trigger_reason {
            ExitReason::StopLoss => PositionEvent::ClosedStopLoss(trade),
            ExitReason::TakeProfit => PositionEvent::ClosedTakeProfit(trade),
            ExitReason::Signal => PositionEvent::ClosedSignal(trade),
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
                    Utc::now(),
                    portfolio,
                ) {
                    Some(position) => {
                        self.notify(PositionEvent::Opened(position.clone()));
                        ExecutionOutcome::Opened(position)
                    }
                    None => ExecutionOutcome::Rejected,
                }
            }
            Signal::Close { position_id } => {
                match resolve_close_target(position_id.as_deref(), portfolio) {
                    Some(position) => {
                        let trade =
                            position.to_trade(current_price, Utc::now(), ExitReason::Signal);
                        self.notify(PositionEvent::ClosedSignal(trade.clone()));
                        ExecutionOutcome::Closed(trade)
                    }
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
        let trade = position.to_trade(price, Utc::now(), reason);
        self.notify(Self::close_event(reason, trade.clone()));
        trade
    }

    /// Tick-level SL/TP check against a raw price.
    ///
    /// Updates the portfolio price, closes every triggered position on
    /// the portfolio, fires the position-change callback, and returns
    /// the resulting trades. Exit prices are the exact SL/TP levels.
    pub fn check_price_update(&self, price: Decimal, portfolio: &mut Portfolio) -> Vec<Trade> {
        portfolio.update_price(price);

        let mut triggered = Vec::new();
        let now = Utc::now();

        for position in portfolio.positions.clone() {
            let Some(trigger) = self.monitor.check_tick(&position, price) else {
                continue;
            };

            let (exit_price, reason) = match trigger {
                ExitTrigger::StopLoss => (position.stop_loss, ExitReason::StopLoss),
                ExitTrigger::TakeProfit => (position.take_profit, ExitReason::TakeProfit),
            };

            let trade = position.to_trade(exit_price, now, reason);
            if portfolio.close_position(&position.id, trade.clone()).is_err() {
                // Already removed by an earlier trigger in this pass.
                continue;
            }

            info!(
                "paper position {} closed by {} at {} (PnL: {:.2})",
                position.id, reason, exit_price, trade.pnl
            );
            self.notify(Self::close_event(reason, trade.clone()));
            triggered.push(trade);
        }

        triggered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn open_long(portfolio: &mut Portfolio, executor: &PaperExecutor) -> Position {
        portfolio.update_price(dec!(100));
        let signal = Signal::open_long(dec!(0.5), dec!(95), dec!(110));
        let ExecutionOutcome::Opened(position) = executor.execute(&signal, dec!(100), portfolio)
        else {
            panic!("expected open");
        };
        portfolio.open_position(position.clone());
        position
    }

    #[test]
    fn test_tick_stop_loss_closes_on_portfolio() {
        let executor = PaperExecutor::new(dec!(10000));
        let mut portfolio = Portfolio::new(dec!(10000));
        let position = open_long(&mut portfolio, &executor);

        let trades = executor.check_price_update(dec!(94), &mut portfolio);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id, position.id);
        assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
        assert_eq!(trades[0].exit_price, dec!(95));
        assert!(!portfolio.has_position());
    }

    #[test]
    fn test_tick_no_trigger_leaves_position() {
        let executor = PaperExecutor::new(dec!(10000));
        let mut portfolio = Portfolio::new(dec!(10000));
        open_long(&mut portfolio, &executor);

        let trades = executor.check_price_update(dec!(102), &mut portfolio);
        assert!(trades.is_empty());
        assert!(portfolio.has_position());
        assert_eq!(portfolio.current_price(), dec!(102));
    }

    #[test]
    fn test_no_double_fill_on_repeated_ticks() {
        let executor = PaperExecutor::new(dec!(10000));
        let mut portfolio = Portfolio::new(dec!(10000));
        open_long(&mut portfolio, &executor);

        let first = executor.check_price_update(dec!(111), &mut portfolio);
        let second = executor.check_price_update(dec!(111), &mut portfolio);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].exit_price, dec!(110));
        assert!(second.is_empty());
    }

    #[test]
    fn test_position_callback_fires() {
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let opened_count = Arc::clone(&opened);
        let closed_count = Arc::clone(&closed);

        let executor = PaperExecutor::new(dec!(10000)).with_position_callback(Box::new(
            move |event| match event {
                PositionEvent::Opened(_) => {
                    opened_count.fetch_add(1, Ordering::SeqCst);
                }
                PositionEvent::ClosedTakeProfit(trade) => {
                    assert_eq!(trade.side, Side::Long);
                    closed_count.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            },
        ));

        let mut portfolio = Portfolio::new(dec!(10000));
        open_long(&mut portfolio, &executor);
        executor.check_price_update(dec!(111), &mut portfolio);

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
