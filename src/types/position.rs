use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExitReason, Side};

/// An open position tracked by the portfolio.
///
/// `size` is in base-currency units, `size_usd` is the notional locked
/// against the balance at entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub size: Decimal,
    pub size_usd: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

impl Position {
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        match self.side {
            Side::Long => (current_price - self.entry_price) * self.size,
            Side::Short => (self.entry_price - current_price) * self.size,
        }
    }

    /// Close this position into a Trade at the given price and time.
    pub fn to_trade(
        &self,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        exit_reason: ExitReason,
    ) -> Trade {
        let pnl = self.unrealized_pnl(exit_price);
        let pnl_percent = if self.size_usd > Decimal::ZERO {
            pnl / self.size_usd * dec!(100)
        } else {
            Decimal::ZERO
        };
        Trade {
            id: self.id.clone(),
            side: self.side,
            entry_price: self.entry_price,
            exit_price,
            entry_time: self.entry_time,
            exit_time,
            size: self.size,
            size_usd: self.size_usd,
            pnl,
            pnl_percent,
            exit_reason,
        }
    }
}

/// A closed position (completed trade). Shares its id with the
/// originating position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub size: Decimal,
    pub size_usd: Decimal,
    pub pnl: Decimal,
    pub pnl_percent: Decimal,
    pub exit_reason: ExitReason,
}
