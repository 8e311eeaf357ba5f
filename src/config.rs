use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Configuration and validation errors. All of these are fatal at
/// startup and surface as a human-readable message with non-zero exit.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("initial_balance must be positive, got {0}")]
    InvalidBalance(Decimal),
    #[error("log_level must be one of DEBUG, INFO, WARNING, ERROR, CRITICAL, got '{0}'")]
    InvalidLogLevel(String),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Supported exchanges for the data adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Bybit,
    Binance,
    Hyperliquid,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Bybit => "bybit",
            Exchange::Binance => "binance",
            Exchange::Hyperliquid => "hyperliquid",
        }
    }
}

impl FromStr for Exchange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bybit" => Ok(Exchange::Bybit),
            "binance" => Ok(Exchange::Binance),
            "hyperliquid" => Ok(Exchange::Hyperliquid),
            other => Err(ConfigError::UnsupportedExchange(other.to_string())),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime configuration, loaded from environment variables with `.env`
/// fallback.
#[derive(Debug, Clone)]
pub struct Config {
    pub exchange: Exchange,
    pub symbol: String,
    pub api_key: String,
    pub api_secret: String,
    pub initial_balance: Decimal,
    pub discord_webhook_url: Option<String>,
    pub database_path: String,
    pub cache_path: String,
    pub output_path: String,
    pub log_level: String,
    pub default_history_candles: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: Exchange::Binance,
            symbol: "BTC/USDT:USDT".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            initial_balance: Decimal::from(10_000),
            discord_webhook_url: None,
            database_path: "data/perpbot.db".to_string(),
            cache_path: "data/candles/".to_string(),
            output_path: "output/".to_string(),
            log_level: "INFO".to_string(),
            default_history_candles: 525_600,
        }
    }
}

impl Config {
    /// Load from the process environment, falling back to `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Missing .env is fine; real env vars still apply.
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(v) = std::env::var("EXCHANGE") {
            config.exchange = v.parse()?;
        }
        if let Ok(v) = std::env::var("SYMBOL") {
            config.symbol = v;
        }
        if let Ok(v) = std::env::var("API_KEY") {
            config.api_key = v;
        }
        if let Ok(v) = std::env::var("API_SECRET") {
            config.api_secret = v;
        }
        if let Ok(v) = std::env::var("INITIAL_BALANCE") {
            let balance = Decimal::from_str(&v).map_err(|e| ConfigError::InvalidValue {
                key: "INITIAL_BALANCE".to_string(),
                message: e.to_string(),
            })?;
            config.initial_balance = balance;
        }
        if let Ok(v) = std::env::var("DISCORD_WEBHOOK_URL") {
            if !v.is_empty() {
                config.discord_webhook_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            config.database_path = v;
        }
        if let Ok(v) = std::env::var("CACHE_PATH") {
            config.cache_path = v;
        }
        if let Ok(v) = std::env::var("OUTPUT_PATH") {
            config.output_path = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("DEFAULT_HISTORY_CANDLES") {
            let n: usize = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "DEFAULT_HISTORY_CANDLES".to_string(),
                message: format!("expected a positive integer, got '{v}'"),
            })?;
            config.default_history_candles = n;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.initial_balance <= Decimal::ZERO {
            return Err(ConfigError::InvalidBalance(self.initial_balance));
        }
        self.log_level = normalize_log_level(&self.log_level)?;
        Ok(())
    }
}

/// Normalize a log level to upper case, validating against the closed set.
pub fn normalize_log_level(level: &str) -> Result<String, ConfigError> {
    let upper = level.to_uppercase();
    match upper.as_str() {
        "DEBUG" | "INFO" | "WARNING" | "ERROR" | "CRITICAL" => Ok(upper),
        _ => Err(ConfigError::InvalidLogLevel(level.to_string())),
    }
}

/// Map a validated log level to a tracing filter directive.
pub fn log_level_directive(level: &str) -> &'static str {
    match level {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exchange_parse() {
        assert_eq!("binance".parse::<Exchange>().unwrap(), Exchange::Binance);
        assert_eq!("ByBit".parse::<Exchange>().unwrap(), Exchange::Bybit);
        assert!("kraken".parse::<Exchange>().is_err());
    }

    #[test]
    fn test_log_level_normalization() {
        assert_eq!(normalize_log_level("warning").unwrap(), "WARNING");
        assert_eq!(normalize_log_level("Debug").unwrap(), "DEBUG");
        assert!(normalize_log_level("trace").is_err());
    }

    #[test]
    fn test_negative_balance_rejected() {
        let mut config = Config {
            initial_balance: dec!(-5),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_history_candles, 525_600);
    }
}
