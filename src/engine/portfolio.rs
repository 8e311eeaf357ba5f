use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{Position, Trade};

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("position '{0}' not found")]
    PositionNotFound(String),
}

/// Tracks open positions, closed trades, and account balance for one
/// engine run.
///
/// `balance` is free cash: opening a position locks its notional,
/// closing returns the notional plus realized PnL. Equity adds the
/// unrealized PnL of open positions at the last observed price.
#[derive(Debug, Clone)]
pub struct Portfolio {
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub positions: Vec<Position>,
    pub trades: Vec<Trade>,
    current_price: Decimal,
}

impl Portfolio {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            balance: initial_balance,
            positions: Vec::new(),
            trades: Vec::new(),
            current_price: Decimal::ZERO,
        }
    }

    /// Rebuild from persisted state (crash recovery).
    pub fn restore(initial_balance: Decimal, balance: Decimal) -> Self {
        Self {
            initial_balance,
            balance,
            positions: Vec::new(),
            trades: Vec::new(),
            current_price: Decimal::ZERO,
        }
    }

    /// Update the last known market price used for equity.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
    }

    pub fn current_price(&self) -> Decimal {
        self.current_price
    }

    /// Balance plus unrealized PnL of all open positions at the last
    /// observed price.
    pub fn equity(&self) -> Decimal {
        let unrealized: Decimal = self
            .positions
            .iter()
            .map(|p| p.unrealized_pnl(self.current_price))
            .sum();
        self.balance + unrealized
    }

    pub fn has_position(&self) -> bool {
        !self.positions.is_empty()
    }

    pub fn get_position(&self, position_id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == position_id)
    }

    /// Add a position and lock its notional from balance.
    pub fn open_position(&mut self, position: Position) {
        self.balance -= position.size_usd;
        self.positions.push(position);
    }

    /// Remove a position and credit the notional plus realized PnL back
    /// to balance.
    pub fn close_position(
        &mut self,
        position_id: &str,
        trade: Trade,
    ) -> Result<(), PortfolioError> {
        let idx = self
            .positions
            .iter()
            .position(|p| p.id == position_id)
            .ok_or_else(|| PortfolioError::PositionNotFound(position_id.to_string()))?;

        self.positions.remove(idx);
        self.balance += trade.size_usd + trade.pnl;
        self.trades.push(trade);
        Ok(())
    }
}
