use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::aggregator::TimeframeAggregator;
use super::executor::{ExecutionOutcome, TradeExecutor};
use super::portfolio::Portfolio;
use super::results::{BacktestResults, EquityPoint};
use super::sl_tp::{ExitTrigger, SlTpMonitor};
use crate::alerts::Alerter;
use crate::data::DataProvider;
use crate::persistence::Database;
use crate::strategies::Strategy;
use crate::types::{Candle, Position, TimeFrame, Trade};

/// How often the forward-test health monitor wakes up.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// How long without a live candle before the health monitor alerts.
pub const DATA_TIMEOUT: Duration = Duration::from_secs(300);

/// Cooperative shutdown switch for a running engine. Signal handlers at
/// the CLI layer call `request_shutdown`; the engine checks the flag at
/// its suspension points, so an in-progress candle step always
/// completes.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Orchestrates data flow between provider, strategy, executor, and
/// portfolio.
///
/// The executor never mutates the portfolio; the engine performs all
/// bookkeeping after receiving execution outcomes, so portfolio
/// mutation, persistence, and alerting stay sequenced under one owner.
pub struct Engine {
    strategy: Box<dyn Strategy>,
    provider: Box<dyn DataProvider>,
    executor: TradeExecutor,
    alerter: Option<Arc<dyn Alerter>>,
    db: Option<Database>,
    pub portfolio: Portfolio,
    monitor: SlTpMonitor,
    symbol: String,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    shutdown: ShutdownHandle,
    equity_curve: Vec<EquityPoint>,
    last_candle_time: Option<DateTime<Utc>>,
}

impl Engine {
    pub fn new(
        strategy: Box<dyn Strategy>,
        provider: Box<dyn DataProvider>,
        executor: TradeExecutor,
        symbol: impl Into<String>,
    ) -> Self {
        let portfolio = Portfolio::new(executor.initial_balance());
        Self {
            strategy,
            provider,
            executor,
            alerter: None,
            db: None,
            portfolio,
            monitor: SlTpMonitor::new(),
            symbol: symbol.into(),
            start: None,
            end: None,
            shutdown: ShutdownHandle::new(),
            equity_curve: Vec::new(),
            last_candle_time: None,
        }
    }

    pub fn with_alerter(mut self, alerter: Arc<dyn Alerter>) -> Self {
        self.alerter = Some(alerter);
        self
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Main entry point: backtest for the backtest executor, forward
    /// test for the paper executor.
    pub async fn run(&mut self) -> Result<Option<BacktestResults>> {
        match self.executor {
            TradeExecutor::Backtest(_) => Ok(Some(self.run_backtest().await?)),
            TradeExecutor::Paper(_) => {
                self.run_forward_test().await?;
                Ok(None)
            }
        }
    }

    // --- Backtest ---

    /// Run a complete backtest over historical data.
    ///
    /// Fetches all 1m candles, splits off the warm-up prefix (aggregator
    /// only, ending with `on_init`), drives the per-candle step over the
    /// remainder, and force-closes whatever is still open at the last
    /// candle's close.
    pub async fn run_backtest(&mut self) -> Result<BacktestResults> {
        let start = self
            .start
            .ok_or_else(|| anyhow!("start must be set for backtest mode"))?;
        let end = self
            .end
            .ok_or_else(|| anyhow!("end must be set for backtest mode"))?;

        info!(
            "starting backtest: {} from {} to {}",
            self.symbol, start, end
        );

        let candles_1m = match self
            .provider
            .get_historical_candles(&self.symbol, TimeFrame::M1, start, end)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                self.alert_error(&format!("backtest data fetch failed: {e}"))
                    .await;
                return Err(e);
            }
        };

        if candles_1m.is_empty() {
            warn!("no candle data returned for the requested range");
            return Ok(BacktestResults::empty(
                start,
                end,
                self.portfolio.initial_balance,
            ));
        }

        let mut aggregator = TimeframeAggregator::new(self.declared_timeframes());
        let warm_up_bars = self.warm_up_bars();
        let (warm_up_candles, backtest_candles) =
            candles_1m.split_at(warm_up_bars.min(candles_1m.len()));

        if backtest_candles.is_empty() {
            warn!("all data consumed by warm-up, no candles left to backtest");
            return Ok(BacktestResults::empty(
                candles_1m[0].timestamp,
                candles_1m[candles_1m.len() - 1].timestamp,
                self.portfolio.initial_balance,
            ));
        }

        if let Some((last, rest)) = warm_up_candles.split_last() {
            aggregator.warm_up(rest);
            let init_data = aggregator.update(last);
            self.strategy.on_init(&init_data);
        }

        self.equity_curve.clear();

        for candle in backtest_candles {
            if let Err(e) = self.step(candle, &mut aggregator).await {
                self.alert_error(&format!("backtest step failed: {e}")).await;
                return Err(e);
            }
        }

        let last_candle = &backtest_candles[backtest_candles.len() - 1];
        self.close_all_positions(last_candle.close, last_candle.timestamp)
            .await?;

        if self.db.is_some() {
            self.save_state().await?;
        }

        let results = BacktestResults {
            trades: self.portfolio.trades.clone(),
            equity_curve: self.equity_curve.clone(),
            start_time: backtest_candles[0].timestamp,
            end_time: last_candle.timestamp,
            initial_balance: self.portfolio.initial_balance,
            final_equity: self.portfolio.equity(),
        };

        info!("backtest complete.\n{}", results.summary());
        Ok(results)
    }

    // --- Forward test ---

    /// Run an unbounded forward test against live data.
    ///
    /// Restores persisted state, warms up from history, then drives the
    /// per-candle step off the live subscription until shutdown is
    /// requested or the stream gives up. Persistence closes on every
    /// exit path.
    pub async fn run_forward_test(&mut self) -> Result<()> {
        let result = self.forward_test_inner().await;

        if let Err(e) = &result {
            error!("forward test failed: {e}");
            self.alert_error(&format!("forward test failed: {e}")).await;
        }

        if let Some(db) = self.db.take() {
            db.close().await;
        }

        if let Some(alerter) = &self.alerter {
            alerter
                .send_alert(
                    &format!("Forward test stopped for {}", self.strategy.name()),
                    None,
                )
                .await;
        }

        result
    }

    async fn forward_test_inner(&mut self) -> Result<()> {
        self.restore_state().await?;

        if let Some(alerter) = &self.alerter {
            alerter.on_strategy_start(self.strategy.name()).await;
        }

        // Warm-up from history so higher timeframes have context before
        // the first live candle arrives.
        let warm_up_bars = self.warm_up_bars();
        let warm_up_end = Utc::now();
        let warm_up_start = warm_up_end - chrono::Duration::minutes(warm_up_bars as i64);

        let warm_up_candles = self
            .provider
            .get_historical_candles(&self.symbol, TimeFrame::M1, warm_up_start, warm_up_end)
            .await?;

        let mut aggregator = TimeframeAggregator::new(self.declared_timeframes());
        if let Some((last, rest)) = warm_up_candles.split_last() {
            aggregator.warm_up(rest);
            let init_data = aggregator.update(last);
            self.strategy.on_init(&init_data);
        } else {
            warn!("no warm-up history available, starting cold");
        }

        let mut rx = self
            .provider
            .subscribe(&self.symbol, &[TimeFrame::M1])
            .await?;

        info!(
            "forward test running: {} with {} (balance {:.2})",
            self.symbol,
            self.strategy.name(),
            self.portfolio.balance
        );

        self.last_candle_time = Some(Utc::now());
        let shutdown_notify = Arc::clone(&self.shutdown.notify);
        let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        health.tick().await; // first tick fires immediately; consume it

        loop {
            if self.shutdown.is_shutdown_requested() {
                info!("shutdown requested, draining forward test loop");
                break;
            }

            tokio::select! {
                received = rx.recv() => match received {
                    Some((timeframe, candle)) => {
                        if timeframe != TimeFrame::M1 {
                            continue;
                        }
                        self.last_candle_time = Some(candle.timestamp);
                        // A strategy or transient I/O failure must not
                        // kill the runtime; alert and keep consuming.
                        if let Err(e) = self.forward_step(&candle, &mut aggregator).await {
                            error!("error processing live candle: {e}");
                            self.alert_error(&format!("candle processing error: {e}"))
                                .await;
                        }
                    }
                    None => {
                        warn!("live candle stream ended");
                        break;
                    }
                },
                _ = health.tick() => {
                    self.check_health().await;
                }
                _ = shutdown_notify.notified() => {
                    info!("shutdown requested, draining forward test loop");
                    break;
                }
            }
        }

        self.provider.unsubscribe().await.ok();
        self.save_state().await?;
        Ok(())
    }

    /// Per-candle work in forward mode: the shared step, then the paper
    /// executor's tick-level SL/TP pass at the candle close (this
    /// runtime ingests no sub-minute ticks), then a state snapshot.
    async fn forward_step(
        &mut self,
        candle: &Candle,
        aggregator: &mut TimeframeAggregator,
    ) -> Result<()> {
        self.step(candle, aggregator).await?;

        if let TradeExecutor::Paper(paper) = &self.executor {
            let trades = paper.check_price_update(candle.close, &mut self.portfolio);
            for trade in trades {
                self.persist_close(&trade.id, &trade).await?;
                self.alert_trade_close(&trade).await;
            }
        }

        self.save_state().await?;
        Ok(())
    }

    async fn check_health(&self) {
        let Some(last) = self.last_candle_time else {
            return;
        };
        let silence = Utc::now().signed_duration_since(last);
        let timeout = chrono::Duration::from_std(DATA_TIMEOUT).unwrap_or(chrono::Duration::zero());
        if silence > timeout {
            let message = format!(
                "no market data received for {}s (threshold {}s)",
                silence.num_seconds(),
                timeout.num_seconds()
            );
            warn!("{message}");
            // Reconnection is the provider's job; this is observability
            // only.
            self.alert_error(&message).await;
        }
    }

    // --- Shared per-candle step ---

    /// The per-candle step, identical in both modes:
    /// aggregate, stamp the simulated clock, update the price, run the
    /// SL/TP phase, then the strategy, then execution, then sample
    /// equity. SL/TP runs before the strategy so a strategy can never
    /// react to a candle that already contained its own stop.
    async fn step(
        &mut self,
        candle: &Candle,
        aggregator: &mut TimeframeAggregator,
    ) -> Result<()> {
        let mtf = aggregator.update(candle);
        self.executor.set_current_time(candle.timestamp);
        self.portfolio.update_price(candle.close);

        // SL/TP phase. Snapshot the position list: closes mutate it.
        for position in self.portfolio.positions.clone() {
            let Some(trigger) = self.monitor.check(&position, candle, None, TimeFrame::M1)
            else {
                continue;
            };

            let exit_price = match trigger {
                ExitTrigger::StopLoss => position.stop_loss,
                ExitTrigger::TakeProfit => position.take_profit,
            };

            let trade = self
                .executor
                .close_position(&position, exit_price, trigger.into());
            self.portfolio.close_position(&position.id, trade.clone())?;
            debug!(
                "position {} closed by {} at {} (PnL: {:.2})",
                position.id, trade.exit_reason, exit_price, trade.pnl
            );
            self.persist_close(&position.id, &trade).await?;
            self.alert_trade_close(&trade).await;
        }

        // Strategy phase.
        let signals = self.strategy.on_candle(&mtf, &self.portfolio);

        // Execution phase.
        for signal in signals {
            match self.executor.execute(&signal, candle.close, &self.portfolio) {
                ExecutionOutcome::Opened(position) => {
                    self.portfolio.open_position(position.clone());
                    debug!(
                        "opened {} position {} at {} (size ${:.2})",
                        position.side, position.id, position.entry_price, position.size_usd
                    );
                    self.persist_open(&position).await?;
                    self.alert_trade_open(&position).await;
                }
                ExecutionOutcome::Closed(trade) => {
                    self.portfolio.close_position(&trade.id, trade.clone())?;
                    debug!(
                        "closed position {} by signal at {} (PnL: {:.2})",
                        trade.id, trade.exit_price, trade.pnl
                    );
                    self.persist_close(&trade.id, &trade).await?;
                    self.alert_trade_close(&trade).await;
                }
                ExecutionOutcome::Rejected => {}
            }
        }

        self.equity_curve.push(EquityPoint {
            timestamp: candle.timestamp,
            equity: self.portfolio.equity(),
        });

        Ok(())
    }

    /// Force-close every remaining position at the given price with
    /// `exit_reason = signal`.
    async fn close_all_positions(
        &mut self,
        price: rust_decimal::Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.executor.set_current_time(timestamp);

        for position in self.portfolio.positions.clone() {
            let trade = self
                .executor
                .close_position(&position, price, crate::types::ExitReason::Signal);
            self.portfolio.close_position(&position.id, trade.clone())?;
            debug!(
                "end of run: force-closed position {} at {} (PnL: {:.2})",
                position.id, price, trade.pnl
            );
            self.persist_close(&position.id, &trade).await?;
            self.alert_trade_close(&trade).await;
        }

        Ok(())
    }

    // --- State restore / persistence ---

    async fn restore_state(&mut self) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };

        if let Some((initial_balance, balance)) = db.get_portfolio().await? {
            info!(
                "restored portfolio from database (balance {:.2})",
                balance
            );
            self.portfolio = Portfolio::restore(initial_balance, balance);
        }

        let positions = db.get_open_positions().await?;
        if !positions.is_empty() {
            info!("restored {} open position(s) from database", positions.len());
            self.portfolio.positions = positions;
        }

        if let Some(state) = db.get_strategy_state(self.strategy.name()).await? {
            info!("restored strategy state for {}", self.strategy.name());
            self.strategy.set_state(&state);
        }

        Ok(())
    }

    async fn persist_open(&self, position: &Position) -> Result<()> {
        if let Some(db) = &self.db {
            db.save_position(position).await?;
        }
        Ok(())
    }

    async fn persist_close(&self, position_id: &str, trade: &Trade) -> Result<()> {
        if let Some(db) = &self.db {
            db.save_trade(trade).await?;
            db.delete_position(position_id).await?;
        }
        Ok(())
    }

    async fn save_state(&self) -> Result<()> {
        if let Some(db) = &self.db {
            db.save_portfolio(&self.portfolio).await?;
            db.save_strategy_state(self.strategy.name(), &self.strategy.get_state())
                .await?;
        }
        Ok(())
    }

    // --- Alerts (optional, never on the failure path) ---

    async fn alert_trade_open(&self, position: &Position) {
        if let Some(alerter) = &self.alerter {
            alerter.on_trade_open(position).await;
        }
    }

    async fn alert_trade_close(&self, trade: &Trade) {
        if let Some(alerter) = &self.alerter {
            alerter.on_trade_close(trade).await;
        }
    }

    async fn alert_error(&self, message: &str) {
        if let Some(alerter) = &self.alerter {
            alerter.on_error(message).await;
        }
    }

    // --- Helpers ---

    /// The strategy's declared timeframes, with 1m forced in since it is
    /// the loop's clock.
    fn declared_timeframes(&self) -> Vec<TimeFrame> {
        let mut timeframes = self.strategy.timeframes();
        if !timeframes.contains(&TimeFrame::M1) {
            warn!(
                "strategy {} did not declare 1m; adding it",
                self.strategy.name()
            );
            timeframes.insert(0, TimeFrame::M1);
        }
        timeframes
    }

    /// Warm-up length: enough 1m bars for one candle of the highest
    /// declared timeframe, with a floor of 100.
    fn warm_up_bars(&self) -> usize {
        let max_minutes = self
            .declared_timeframes()
            .iter()
            .map(|tf| tf.minutes() as usize)
            .max()
            .unwrap_or(1);
        max_minutes.max(100)
    }
}
