mod common;

use rust_decimal_macros::dec;
use serde_json::json;

use common::{flat_candles, CannedLiveProvider, OpenOnce};
use perpbot::engine::{Engine, MultiTimeframeData, PaperExecutor, Portfolio, TradeExecutor};
use perpbot::persistence::Database;
use perpbot::strategies::Strategy;
use perpbot::types::{ExitReason, Signal};

fn forward_engine(strategy: Box<dyn Strategy>, provider: CannedLiveProvider) -> Engine {
    let executor = TradeExecutor::Paper(PaperExecutor::new(dec!(10000)));
    Engine::new(strategy, Box::new(provider), executor, "BTC/USDT:USDT")
}

/// Counts candles and round-trips the count through strategy state.
#[derive(Debug)]
struct CountingStrategy {
    counter: u64,
}

impl Strategy for CountingStrategy {
    fn name(&self) -> &'static str {
        "CountingStrategy"
    }

    fn on_candle(&mut self, _data: &MultiTimeframeData, _portfolio: &Portfolio) -> Vec<Signal> {
        self.counter += 1;
        Vec::new()
    }

    fn get_state(&self) -> serde_json::Value {
        json!({ "counter": self.counter })
    }

    fn set_state(&mut self, state: &serde_json::Value) {
        self.counter = state.get("counter").and_then(|v| v.as_u64()).unwrap_or(0);
    }
}

#[tokio::test]
async fn test_forward_test_runs_to_stream_end() {
    let provider = CannedLiveProvider {
        warm_up: flat_candles(120, dec!(100)),
        live: flat_candles(5, dec!(101)),
    };
    let mut engine = forward_engine(Box::new(CountingStrategy { counter: 0 }), provider);

    let result = engine.run().await.unwrap();
    assert!(result.is_none());
    assert_eq!(engine.portfolio.current_price(), dec!(101));
}

#[tokio::test]
async fn test_forward_take_profit_fills_at_level() {
    // The live candle trades through the target; the exit must fill at
    // the TP level, not the candle close.
    let mut live = flat_candles(5, dec!(100));
    live[3].close = dec!(112);
    live[3].high = dec!(112.5);

    let provider = CannedLiveProvider {
        warm_up: flat_candles(120, dec!(100)),
        live,
    };
    let strategy = OpenOnce::long(dec!(0.5), dec!(0.95), dec!(1.10));
    let mut engine = forward_engine(Box::new(strategy), provider);

    engine.run_forward_test().await.unwrap();

    assert_eq!(engine.portfolio.trades.len(), 1);
    let trade = &engine.portfolio.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
    assert_eq!(trade.exit_price, dec!(110));
    assert!(!engine.portfolio.has_position());
}

#[tokio::test]
async fn test_forward_test_persists_and_restores_state() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("forward.db");
    let db_path = db_path.to_str().unwrap();

    // First run: 3 live candles, then the stream ends.
    {
        let provider = CannedLiveProvider {
            warm_up: flat_candles(120, dec!(100)),
            live: flat_candles(3, dec!(100)),
        };
        let db = Database::connect(db_path).await.unwrap();
        let mut engine =
            forward_engine(Box::new(CountingStrategy { counter: 0 }), provider).with_database(db);
        engine.run_forward_test().await.unwrap();
    }

    let db = Database::connect(db_path).await.unwrap();
    let state = db
        .get_strategy_state("CountingStrategy")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state["counter"], 3);
    assert!(db.get_portfolio().await.unwrap().is_some());
    db.close().await;

    // Second run restores the counter and keeps counting.
    {
        let provider = CannedLiveProvider {
            warm_up: flat_candles(120, dec!(100)),
            live: flat_candles(2, dec!(100)),
        };
        let db = Database::connect(db_path).await.unwrap();
        let mut engine =
            forward_engine(Box::new(CountingStrategy { counter: 0 }), provider).with_database(db);
        engine.run_forward_test().await.unwrap();
    }

    let db = Database::connect(db_path).await.unwrap();
    let state = db
        .get_strategy_state("CountingStrategy")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state["counter"], 5);
    db.close().await;
}

#[tokio::test]
async fn test_forward_test_restores_portfolio_balance() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("restore.db");
    let db_path = db_path.to_str().unwrap();

    // Seed a persisted portfolio with a drawn-down balance.
    {
        let db = Database::connect(db_path).await.unwrap();
        let mut portfolio = Portfolio::new(dec!(10000));
        portfolio.balance = dec!(8500);
        db.save_portfolio(&portfolio).await.unwrap();
        db.close().await;
    }

    let provider = CannedLiveProvider {
        warm_up: flat_candles(120, dec!(100)),
        live: Vec::new(),
    };
    let db = Database::connect(db_path).await.unwrap();
    let mut engine =
        forward_engine(Box::new(CountingStrategy { counter: 0 }), provider).with_database(db);
    engine.run_forward_test().await.unwrap();

    assert_eq!(engine.portfolio.initial_balance, dec!(10000));
    assert_eq!(engine.portfolio.balance, dec!(8500));
}

#[tokio::test]
async fn test_forward_test_persists_open_position() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("position.db");
    let db_path = db_path.to_str().unwrap();

    // Stop and target far away so the position stays open at stream end.
    let provider = CannedLiveProvider {
        warm_up: flat_candles(120, dec!(100)),
        live: flat_candles(3, dec!(100)),
    };
    let strategy = OpenOnce::long(dec!(0.5), dec!(0.5), dec!(1.5));
    let db = Database::connect(db_path).await.unwrap();
    let mut engine = forward_engine(Box::new(strategy), provider).with_database(db);
    engine.run_forward_test().await.unwrap();

    assert!(engine.portfolio.has_position());
    let open_position = engine.portfolio.positions[0].clone();

    let db = Database::connect(db_path).await.unwrap();
    let persisted = db.get_open_positions().await.unwrap();
    assert_eq!(persisted, vec![open_position]);
    db.close().await;
}

#[tokio::test]
async fn test_shutdown_requested_before_run_exits_promptly() {
    let provider = CannedLiveProvider {
        warm_up: flat_candles(120, dec!(100)),
        live: flat_candles(3, dec!(100)),
    };
    let mut engine = forward_engine(Box::new(CountingStrategy { counter: 0 }), provider);

    let handle = engine.shutdown_handle();
    handle.request_shutdown();
    assert!(handle.is_shutdown_requested());

    // The loop observes the flag on entry and drains without
    // processing.
    engine.run_forward_test().await.unwrap();
}
