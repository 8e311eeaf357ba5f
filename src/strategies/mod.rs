pub mod indicators;
pub mod ma_crossover;
pub mod mtf_trend;
pub mod rsi_reversion;

pub use ma_crossover::MaCrossover;
pub use mtf_trend::MtfTrend;
pub use rsi_reversion::RsiReversion;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::engine::aggregator::MultiTimeframeData;
use crate::engine::portfolio::Portfolio;
use crate::types::{Signal, TimeFrame};

/// A trading strategy driven by the engine's event loop.
///
/// Strategies are deterministic functions of their inputs: the
/// multi-timeframe snapshot and the portfolio. The declared timeframes
/// must include 1m, which is the loop's clock.
pub trait Strategy: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn timeframes(&self) -> Vec<TimeFrame> {
        vec![TimeFrame::M1]
    }

    /// Called once with historical data before the main loop.
    fn on_init(&mut self, _data: &MultiTimeframeData) {}

    /// Called on each 1m candle close. Returns zero or more signals.
    fn on_candle(&mut self, data: &MultiTimeframeData, portfolio: &Portfolio) -> Vec<Signal>;

    /// Opaque state for persistence and crash recovery. The runtime
    /// round-trips this blob without inspecting it; strategies own
    /// their schema.
    fn get_state(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    fn set_state(&mut self, _state: &Value) {}
}

type StrategyFactory = fn() -> Box<dyn Strategy>;

/// Name-to-constructor registry populated from two sources: built-in
/// example strategies and user registrations. On a name collision the
/// first registration wins and a warning is logged, so the outcome is
/// deterministic regardless of what gets registered later.
pub struct StrategyRegistry {
    entries: Vec<(String, StrategyFactory)>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry pre-loaded with the built-in example strategies.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("MaCrossover", || Box::new(MaCrossover::default()));
        registry.register("RsiReversion", || Box::new(RsiReversion::default()));
        registry.register("MtfTrend", || Box::new(MtfTrend::default()));
        registry
    }

    pub fn register(&mut self, name: &str, factory: StrategyFactory) {
        if let Some((existing, _)) = self.entries.iter().find(|(n, _)| n == name) {
            warn!(
                "duplicate strategy name '{}' ignored; keeping first registration",
                existing
            );
            return;
        }
        self.entries.push((name.to_string(), factory));
    }

    pub fn available(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn load(&self, name: &str) -> Result<Box<dyn Strategy>> {
        let factory = self
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory)
            .ok_or_else(|| {
                let available = self.available();
                let list = if available.is_empty() {
                    "(none found)".to_string()
                } else {
                    available.join(", ")
                };
                anyhow!("strategy '{name}' not found; available strategies: {list}")
            })?;

        info!("loading strategy: {}", name);
        Ok(factory())
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
