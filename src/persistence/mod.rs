use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::engine::portfolio::Portfolio;
use crate::types::{ExitReason, Position, Side, Trade};

/// SQLite persistence for crash recovery: open positions, closed
/// trades, the portfolio row, and opaque per-strategy state blobs.
///
/// Timestamps are stored as RFC 3339 strings and re-attached as UTC on
/// read; monetary values are stored as decimal strings to avoid float
/// drift.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) and initialize the schema.
    pub async fn connect(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;
        info!("database initialized at {}", db_path);
        Ok(db)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                size TEXT NOT NULL,
                size_usd TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                size TEXT NOT NULL,
                size_usd TEXT NOT NULL,
                pnl TEXT NOT NULL,
                pnl_percent TEXT NOT NULL,
                exit_reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                initial_balance TEXT NOT NULL,
                balance TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategy_state (
                strategy_name TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // --- Positions ---

    pub async fn save_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO positions
                (id, side, entry_price, entry_time, size, size_usd,
                 stop_loss, take_profit, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.id)
        .bind(position.side.as_str())
        .bind(position.entry_price.to_string())
        .bind(position.entry_time.to_rfc3339())
        .bind(position.size.to_string())
        .bind(position.size_usd.to_string())
        .bind(position.stop_loss.to_string())
        .bind(position.take_profit.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_position(&self, position_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE id = ?")
            .bind(position_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY entry_time ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut positions = Vec::new();
        for row in rows {
            positions.push(Position {
                id: row.get("id"),
                side: parse_side(row.get("side"))?,
                entry_price: parse_decimal(row.get("entry_price"))?,
                entry_time: parse_utc(row.get("entry_time"))?,
                size: parse_decimal(row.get("size"))?,
                size_usd: parse_decimal(row.get("size_usd"))?,
                stop_loss: parse_decimal(row.get("stop_loss"))?,
                take_profit: parse_decimal(row.get("take_profit"))?,
            });
        }
        Ok(positions)
    }

    // --- Trades ---

    pub async fn save_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO trades
                (id, side, entry_price, exit_price, entry_time, exit_time,
                 size, size_usd, pnl, pnl_percent, exit_reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(trade.side.as_str())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.to_string())
        .bind(trade.entry_time.to_rfc3339())
        .bind(trade.exit_time.to_rfc3339())
        .bind(trade.size.to_string())
        .bind(trade.size_usd.to_string())
        .bind(trade.pnl.to_string())
        .bind(trade.pnl_percent.to_string())
        .bind(trade.exit_reason.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_trades(&self) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY exit_time ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut trades = Vec::new();
        for row in rows {
            trades.push(Trade {
                id: row.get("id"),
                side: parse_side(row.get("side"))?,
                entry_price: parse_decimal(row.get("entry_price"))?,
                exit_price: parse_decimal(row.get("exit_price"))?,
                entry_time: parse_utc(row.get("entry_time"))?,
                exit_time: parse_utc(row.get("exit_time"))?,
                size: parse_decimal(row.get("size"))?,
                size_usd: parse_decimal(row.get("size_usd"))?,
                pnl: parse_decimal(row.get("pnl"))?,
                pnl_percent: parse_decimal(row.get("pnl_percent"))?,
                exit_reason: parse_exit_reason(row.get("exit_reason"))?,
            });
        }
        Ok(trades)
    }

    // --- Portfolio ---

    pub async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO portfolio (id, initial_balance, balance, updated_at)
            VALUES (1, ?, ?, ?)
            "#,
        )
        .bind(portfolio.initial_balance.to_string())
        .bind(portfolio.balance.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The saved (initial_balance, balance) pair, or None if nothing has
    /// been persisted yet.
    pub async fn get_portfolio(&self) -> Result<Option<(Decimal, Decimal)>> {
        let row = sqlx::query("SELECT initial_balance, balance FROM portfolio WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some((
                parse_decimal(row.get("initial_balance"))?,
                parse_decimal(row.get("balance"))?,
            ))),
            None => Ok(None),
        }
    }

    // --- Strategy state ---

    pub async fn save_strategy_state(&self, strategy_name: &str, state: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO strategy_state (strategy_name, state_json, updated_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(strategy_name)
        .bind(serde_json::to_string(state)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_strategy_state(&self, strategy_name: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT state_json FROM strategy_state WHERE strategy_name = ?")
            .bind(strategy_name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("state_json");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }
}

fn parse_decimal(value: String) -> Result<Decimal> {
    Decimal::from_str(&value).map_err(|e| anyhow!("invalid decimal '{value}': {e}"))
}

fn parse_utc(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)
        .map_err(|e| anyhow!("invalid timestamp '{value}': {e}"))?
        .with_timezone(&Utc))
}

fn parse_side(value: String) -> Result<Side> {
    Side::parse(&value).ok_or_else(|| anyhow!("invalid side '{value}'"))
}

fn parse_exit_reason(value: String) -> Result<ExitReason> {
    ExitReason::parse(&value).ok_or_else(|| anyhow!("invalid exit reason '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    async fn temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::connect(path.to_str().unwrap()).await.unwrap();
        (dir, db)
    }

    fn sample_position() -> Position {
        Position {
            id: "pos-1".to_string(),
            side: Side::Long,
            entry_price: dec!(100000.5),
            entry_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            size: dec!(0.05),
            size_usd: dec!(5000.025),
            stop_loss: dec!(95000),
            take_profit: dec!(110000),
        }
    }

    #[tokio::test]
    async fn test_position_round_trip() {
        let (_dir, db) = temp_db().await;
        let position = sample_position();

        db.save_position(&position).await.unwrap();
        let loaded = db.get_open_positions().await.unwrap();
        assert_eq!(loaded, vec![position.clone()]);

        db.delete_position(&position.id).await.unwrap();
        assert!(db.get_open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trade_round_trip() {
        let (_dir, db) = temp_db().await;
        let exit_time = Utc.with_ymd_and_hms(2024, 6, 2, 3, 30, 0).unwrap();
        let trade = sample_position().to_trade(dec!(110000), exit_time, ExitReason::TakeProfit);

        db.save_trade(&trade).await.unwrap();
        let loaded = db.get_trades().await.unwrap();
        assert_eq!(loaded, vec![trade]);
        assert_eq!(loaded[0].exit_time, exit_time);
    }

    #[tokio::test]
    async fn test_portfolio_round_trip() {
        let (_dir, db) = temp_db().await;
        assert!(db.get_portfolio().await.unwrap().is_none());

        let mut portfolio = Portfolio::new(dec!(10000));
        portfolio.balance = dec!(8500.25);
        db.save_portfolio(&portfolio).await.unwrap();

        let (initial, balance) = db.get_portfolio().await.unwrap().unwrap();
        assert_eq!(initial, dec!(10000));
        assert_eq!(balance, dec!(8500.25));
    }

    #[tokio::test]
    async fn test_strategy_state_round_trip() {
        let (_dir, db) = temp_db().await;
        assert!(db.get_strategy_state("MaCrossover").await.unwrap().is_none());

        let state = json!({"prev_fast": "101.5", "nested": {"count": 3}});
        db.save_strategy_state("MaCrossover", &state).await.unwrap();

        let loaded = db.get_strategy_state("MaCrossover").await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }
}
