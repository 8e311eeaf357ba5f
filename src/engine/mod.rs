pub mod aggregator;
pub mod backtest;
pub mod core;
pub mod executor;
pub mod paper;
pub mod portfolio;
pub mod results;
pub mod sl_tp;

pub use aggregator::{MultiTimeframeData, TimeframeAggregator, TimeframeData};
pub use backtest::BacktestExecutor;
pub use core::{Engine, ShutdownHandle, DATA_TIMEOUT, HEALTH_CHECK_INTERVAL};
pub use executor::{ExecutionOutcome, TradeExecutor};
pub use paper::{PaperExecutor, PositionEvent};
pub use portfolio::{Portfolio, PortfolioError};
pub use results::{BacktestResults, EquityPoint};
pub use sl_tp::{DrillDownData, ExitTrigger, SlTpMonitor};
