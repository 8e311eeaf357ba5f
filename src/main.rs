use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use perpbot::alerts::DiscordAlerter;
use perpbot::config::{log_level_directive, Config, ConfigError};
use perpbot::data::{cache, HistoricalProvider, LiveProvider};
use perpbot::engine::{BacktestExecutor, Engine, PaperExecutor, TradeExecutor};
use perpbot::persistence::Database;
use perpbot::strategies::StrategyRegistry;
use perpbot::types::TimeFrame;

#[derive(Parser)]
#[command(name = "perpbot")]
#[command(version = "0.1.0")]
#[command(about = "Single-symbol perpetual futures trading runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest over historical data
    Backtest {
        /// Strategy name
        #[arg(long)]
        strategy: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD), strictly after start
        #[arg(long)]
        end: String,
        /// Initial balance in USDT (default from config)
        #[arg(long)]
        initial_balance: Option<f64>,
    },
    /// Run forward testing (live paper trading) until interrupted
    ForwardTest {
        /// Strategy name
        #[arg(long)]
        strategy: String,
        /// Initial balance in USDT (default from config)
        #[arg(long)]
        initial_balance: Option<f64>,
    },
    /// Fetch and cache historical candle data
    FetchData {
        /// Trading symbol (default from config)
        #[arg(long)]
        symbol: Option<String>,
        /// Candle timeframe (1m, 5m, 15m, 1h, 4h, 1d, 1w)
        #[arg(long, default_value = "1m")]
        timeframe: String,
        /// Start date (YYYY-MM-DD); defaults to the last cached
        /// timestamp, or 4 years ago for an empty cache
        #[arg(long)]
        start: Option<String>,
        /// End date (YYYY-MM-DD); defaults to now
        #[arg(long)]
        end: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level_directive(&config.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Backtest {
            strategy,
            start,
            end,
            initial_balance,
        } => run_backtest(&config, &strategy, &start, &end, initial_balance).await,
        Commands::ForwardTest {
            strategy,
            initial_balance,
        } => run_forward_test(&config, &strategy, initial_balance).await,
        Commands::FetchData {
            symbol,
            timeframe,
            start,
            end,
        } => fetch_data(&config, symbol, &timeframe, start, end).await,
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ConfigError::InvalidDate(value.to_string()).into())
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn day_end(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap())
        .and_utc()
}

fn resolve_balance(config: &Config, flag: Option<f64>) -> Result<Decimal> {
    let balance = match flag {
        Some(value) => {
            Decimal::try_from(value).map_err(|e| anyhow!("invalid initial balance: {e}"))?
        }
        None => config.initial_balance,
    };
    if balance <= Decimal::ZERO {
        return Err(ConfigError::InvalidBalance(balance).into());
    }
    Ok(balance)
}

async fn run_backtest(
    config: &Config,
    strategy_name: &str,
    start: &str,
    end: &str,
    initial_balance: Option<f64>,
) -> Result<()> {
    let start_date = parse_date(start)?;
    let end_date = parse_date(end)?;
    if end_date <= start_date {
        return Err(anyhow!("end date must be strictly after start date"));
    }

    let balance = resolve_balance(config, initial_balance)?;
    let strategy = StrategyRegistry::with_builtins().load(strategy_name)?;
    let provider = HistoricalProvider::new(config.exchange, config.cache_path.clone())?;
    let executor = TradeExecutor::Backtest(BacktestExecutor::new(balance));

    let mut engine = Engine::new(
        strategy,
        Box::new(provider),
        executor,
        config.symbol.clone(),
    )
    .with_range(day_start(start_date), day_end(end_date));

    let results = engine.run_backtest().await?;
    println!("{}", results.summary());
    Ok(())
}

async fn run_forward_test(
    config: &Config,
    strategy_name: &str,
    initial_balance: Option<f64>,
) -> Result<()> {
    let balance = resolve_balance(config, initial_balance)?;
    let strategy = StrategyRegistry::with_builtins().load(strategy_name)?;
    let provider = LiveProvider::new(config.exchange, config.cache_path.clone())?;
    let executor = TradeExecutor::Paper(PaperExecutor::new(balance));
    let db = Database::connect(&config.database_path).await?;

    let mut engine = Engine::new(
        strategy,
        Box::new(provider),
        executor,
        config.symbol.clone(),
    )
    .with_database(db);

    if let Some(webhook_url) = &config.discord_webhook_url {
        engine = engine.with_alerter(Arc::new(DiscordAlerter::new(webhook_url.clone())));
    } else {
        warn!("DISCORD_WEBHOOK_URL not set; alerts disabled");
    }

    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, requesting shutdown");
            shutdown.request_shutdown();
        }
    });

    info!("starting forward test (press Ctrl+C to stop)");
    engine.run_forward_test().await
}

async fn fetch_data(
    config: &Config,
    symbol: Option<String>,
    timeframe: &str,
    start: Option<String>,
    end: Option<String>,
) -> Result<()> {
    let symbol = symbol.unwrap_or_else(|| config.symbol.clone());
    let timeframe = TimeFrame::parse(timeframe)?;
    let cache_dir = std::path::Path::new(&config.cache_path);

    let end_time = match end {
        Some(value) => day_end(parse_date(&value)?),
        None => Utc::now(),
    };
    let start_time = match start {
        Some(value) => day_start(parse_date(&value)?),
        None => match cache::cache_date_range(cache_dir, &symbol, timeframe)? {
            Some((_, last_cached)) => last_cached,
            None => end_time - chrono::Duration::days(4 * 365),
        },
    };

    if end_time <= start_time {
        return Err(anyhow!("fetch range is empty: start {start_time} >= end {end_time}"));
    }

    let provider = HistoricalProvider::new(config.exchange, config.cache_path.clone())?;
    let candles = perpbot::data::DataProvider::get_historical_candles(
        &provider, &symbol, timeframe, start_time, end_time,
    )
    .await?;

    info!(
        "fetched and cached {} {} candles for {}",
        candles.len(),
        timeframe,
        symbol
    );
    println!(
        "Cached {} {} candles for {} ({} to {})",
        candles.len(),
        timeframe,
        symbol,
        start_time.format("%Y-%m-%d %H:%M"),
        end_time.format("%Y-%m-%d %H:%M"),
    );
    Ok(())
}
