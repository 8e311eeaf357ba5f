use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Trade;

/// A single point on the equity curve, sampled after each processed
/// candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Results from a completed backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResults {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub initial_balance: Decimal,
    pub final_equity: Decimal,
}

impl BacktestResults {
    pub fn empty(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        initial_balance: Decimal,
    ) -> Self {
        Self {
            trades: Vec::new(),
            equity_curve: Vec::new(),
            start_time,
            end_time,
            initial_balance,
            final_equity: initial_balance,
        }
    }

    pub fn total_trades(&self) -> usize {
        self.trades.len()
    }

    /// Fraction of winning trades in [0, 1]. Break-even trades count in
    /// the denominator but not as wins.
    pub fn win_rate(&self) -> f64 {
        win_rate(&self.trades)
    }

    /// Gross profit over gross loss; infinity with winners and no
    /// losers, 0 with no winners.
    pub fn profit_factor(&self) -> f64 {
        profit_factor(&self.trades)
    }

    /// Total return as a decimal fraction (0.15 = 15%).
    pub fn total_return(&self) -> f64 {
        total_return(self.initial_balance, self.final_equity)
    }

    pub fn max_drawdown(&self) -> f64 {
        max_drawdown(&self.equity_curve)
    }

    pub fn sharpe_ratio(&self) -> f64 {
        sharpe_ratio(&self.equity_curve)
    }

    /// Human-readable summary block.
    pub fn summary(&self) -> String {
        let pf = self.profit_factor();
        let pf_str = if pf.is_infinite() {
            "inf".to_string()
        } else {
            format!("{pf:.2}")
        };
        let lines = [
            "=".repeat(50),
            "BACKTEST RESULTS".to_string(),
            "=".repeat(50),
            format!(
                "Period:          {} to {}",
                self.start_time.format("%Y-%m-%d"),
                self.end_time.format("%Y-%m-%d")
            ),
            format!("Initial Balance: ${:.2}", self.initial_balance),
            format!("Final Equity:    ${:.2}", self.final_equity),
            format!("Total Return:    {:+.2}%", self.total_return() * 100.0),
            format!("Total Trades:    {}", self.total_trades()),
            format!("Win Rate:        {:.1}%", self.win_rate() * 100.0),
            format!("Profit Factor:   {pf_str}"),
            format!("Max Drawdown:    {:.2}%", self.max_drawdown() * 100.0),
            format!("Sharpe Ratio:    {:.2}", self.sharpe_ratio()),
            "=".repeat(50),
        ];
        lines.join("\n")
    }
}

pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
    winners as f64 / trades.len() as f64
}

pub fn profit_factor(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let gross_profit: Decimal = trades
        .iter()
        .filter(|t| t.pnl > Decimal::ZERO)
        .map(|t| t.pnl)
        .sum();
    let gross_loss: Decimal = trades
        .iter()
        .filter(|t| t.pnl < Decimal::ZERO)
        .map(|t| t.pnl.abs())
        .sum();

    if gross_loss.is_zero() {
        if gross_profit > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        decimal_to_f64(gross_profit) / decimal_to_f64(gross_loss)
    }
}

pub fn total_return(initial_balance: Decimal, final_equity: Decimal) -> f64 {
    if initial_balance.is_zero() {
        return 0.0;
    }
    decimal_to_f64((final_equity - initial_balance) / initial_balance)
}

/// Maximum peak-to-trough drawdown as a decimal fraction. Zero for
/// curves with at most one point or monotone non-decreasing curves.
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    if equity_curve.len() <= 1 {
        return 0.0;
    }
    let mut peak = equity_curve[0].equity;
    let mut max_dd = Decimal::ZERO;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > Decimal::ZERO {
            let dd = (peak - point.equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    decimal_to_f64(max_dd)
}

/// Annualized Sharpe ratio over point-to-point equity returns, using the
/// population standard deviation and a sqrt(252) annualization factor.
/// Zero for fewer than 2 points or zero deviation.
pub fn sharpe_ratio(equity_curve: &[EquityPoint]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|pair| {
            let prev = decimal_to_f64(pair[0].equity);
            if prev == 0.0 {
                0.0
            } else {
                (decimal_to_f64(pair[1].equity) - prev) / prev
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return 0.0;
    }

    mean * 252.0_f64.sqrt() / std_dev
}

fn decimal_to_f64(value: Decimal) -> f64 {
    value.try_into().unwrap_or(0.0)
}
