// src/config.rs
use crate::domain::errors::{AppError, AppResult};
use dotenv::dotenv;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

const DEFAULT_SYMBOLS: &str = "BTCUSDT:0.4,ETHUSDT:0.3,SOLUSDT:0.2,ADAUSDT:0.1";

/// Trading bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange API credentials
    pub exchange: ExchangeConfig,

    /// Symbols, intervals and loop timing
    pub trading: TradingConfig,

    /// Decision scorer thresholds and sizing inputs
    pub decision: DecisionConfig,

    /// Risk management configuration
    pub risk: RiskConfig,

    /// Order placement
    pub execution: ExecutionConfig,

    /// Dashboard publishing and the embedded status server
    pub status: StatusConfig,

    /// Trade ledger output
    pub ledger: LedgerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Exchange API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange name (only "binance" is supported)
    pub name: String,

    /// API key
    pub api_key: String,

    /// API secret
    pub api_secret: String,

    /// Use testnet
    pub testnet: bool,

    /// Upper bound on every exchange request
    pub request_timeout_secs: u64,
}

/// A traded pair and the share of equity it may use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub allocation: f64,

    /// Disabled pairs are neither analyzed nor entered
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lot step override; otherwise the exchange's LOT_SIZE filter is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_step: Option<Decimal>,
}

impl SymbolConfig {
    pub fn new(symbol: &str, allocation: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            allocation,
            enabled: true,
            quantity_step: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Trading symbols with their base allocation
    pub symbols: Vec<SymbolConfig>,

    /// Quote asset used to value the account (e.g. "USDT")
    pub quote_asset: String,

    /// Candle interval (e.g. "1m", "5m", "1h")
    pub interval: String,

    /// Number of candles fetched per analysis
    pub candle_limit: u32,

    pub analysis_interval_secs: u64,

    pub price_check_interval_secs: u64,

    /// Place real orders; otherwise decisions are only logged
    pub auto_trading: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// |score| needed for BUY or SELL
    pub confidence_threshold: f64,

    pub kelly_win_rate: f64,
    pub kelly_avg_win: f64,
    pub kelly_avg_loss: f64,
    pub max_kelly_fraction: f64,

    /// Fraction of equity bounds for a single entry
    pub min_position_size_pct: f64,
    pub max_position_size_pct: f64,
}

/// Risk management configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fall from the day's starting equity that halts new entries
    pub max_daily_loss_pct: f64,

    /// Maximum number of fills that may build one symbol's position
    pub max_positions_per_symbol: u32,

    /// Maximum cost basis of all positions as a fraction of equity
    pub max_total_exposure_pct: f64,

    pub base_profit_pct: f64,
    pub base_stop_loss_pct: f64,

    /// Unrealized gain that arms the trailing stop
    pub trailing_activation_pct: f64,

    /// Distance of the trailing stop below price
    pub trailing_distance_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub max_attempts: u32,
    pub retry_base_secs: u64,
    pub retry_step_secs: u64,

    /// Order quantities are rounded down to a multiple of this
    pub quantity_step: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Push snapshots to `url`
    pub enabled: bool,
    pub url: String,
    pub timeout_ms: u64,

    /// Run the status board in-process on `bind_addr`
    pub serve: bool,
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub enabled: bool,
    pub path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,

    /// Log to file
    pub to_file: bool,

    /// Log file path
    pub file_path: Option<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse `"BTCUSDT:0.4,ETHUSDT:0.3"`. Symbols without an allocation share
/// whatever the explicit ones leave over.
pub fn parse_symbols(raw: &str) -> AppResult<Vec<SymbolConfig>> {
    let mut symbols = Vec::new();
    let mut unallocated = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match entry.split_once(':') {
            Some((symbol, allocation)) => {
                let allocation: f64 = allocation.trim().parse().map_err(|_| {
                    AppError::Config(format!("Invalid allocation for {}: {}", symbol, allocation))
                })?;
                symbols.push(SymbolConfig::new(&symbol.trim().to_uppercase(), allocation));
            }
            None => {
                unallocated.push(symbols.len());
                symbols.push(SymbolConfig::new(&entry.to_uppercase(), 0.0));
            }
        }
    }

    if !unallocated.is_empty() {
        let explicit: f64 = symbols.iter().map(|s| s.allocation).sum();
        let share = (1.0 - explicit).max(0.0) / unallocated.len() as f64;
        for index in unallocated {
            symbols[index].allocation = share;
        }
    }

    Ok(symbols)
}

impl Config {
    /// Load from `CONFIG_FILE` when set, otherwise from the environment
    pub fn load() -> AppResult<Self> {
        dotenv().ok();

        let config = match env::var("CONFIG_FILE") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();
        let defaults = Config::default();

        let exchange_config = ExchangeConfig {
            name: env::var("EXCHANGE_NAME").unwrap_or_else(|_| "binance".to_string()),
            api_key: env::var("API_KEY").map_err(|_| {
                AppError::Config("Missing API_KEY environment variable".to_string())
            })?,
            api_secret: env::var("API_SECRET").map_err(|_| {
                AppError::Config("Missing API_SECRET environment variable".to_string())
            })?,
            testnet: env_or("USE_TESTNET", defaults.exchange.testnet),
            request_timeout_secs: env_or(
                "REQUEST_TIMEOUT_SECS",
                defaults.exchange.request_timeout_secs,
            ),
        };

        let symbols = parse_symbols(
            &env::var("TRADING_SYMBOLS").unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string()),
        )?;

        let trading_config = TradingConfig {
            symbols,
            quote_asset: env::var("QUOTE_ASSET").unwrap_or(defaults.trading.quote_asset),
            interval: env::var("TRADING_INTERVAL").unwrap_or(defaults.trading.interval),
            candle_limit: env_or("CANDLE_LIMIT", defaults.trading.candle_limit),
            analysis_interval_secs: env_or(
                "ANALYSIS_INTERVAL_SECS",
                defaults.trading.analysis_interval_secs,
            ),
            price_check_interval_secs: env_or(
                "PRICE_CHECK_INTERVAL_SECS",
                defaults.trading.price_check_interval_secs,
            ),
            auto_trading: env_or("AUTO_TRADING", defaults.trading.auto_trading),
        };

        let decision_config = DecisionConfig {
            confidence_threshold: env_or(
                "CONFIDENCE_THRESHOLD",
                defaults.decision.confidence_threshold,
            ),
            min_position_size_pct: env_or(
                "MIN_POSITION_SIZE_PCT",
                defaults.decision.min_position_size_pct,
            ),
            max_position_size_pct: env_or(
                "MAX_POSITION_SIZE_PCT",
                defaults.decision.max_position_size_pct,
            ),
            ..defaults.decision
        };

        let risk_config = RiskConfig {
            max_daily_loss_pct: env_or("MAX_DAILY_LOSS_PCT", defaults.risk.max_daily_loss_pct),
            max_positions_per_symbol: env_or(
                "MAX_POSITIONS_PER_SYMBOL",
                defaults.risk.max_positions_per_symbol,
            ),
            max_total_exposure_pct: env_or(
                "MAX_TOTAL_EXPOSURE_PCT",
                defaults.risk.max_total_exposure_pct,
            ),
            base_profit_pct: env_or("BASE_PROFIT_PCT", defaults.risk.base_profit_pct),
            base_stop_loss_pct: env_or("BASE_STOP_LOSS_PCT", defaults.risk.base_stop_loss_pct),
            trailing_activation_pct: env_or(
                "TRAILING_ACTIVATION_PCT",
                defaults.risk.trailing_activation_pct,
            ),
            trailing_distance_pct: env_or(
                "TRAILING_DISTANCE_PCT",
                defaults.risk.trailing_distance_pct,
            ),
        };

        let execution_config = ExecutionConfig {
            max_attempts: env_or("ORDER_MAX_ATTEMPTS", defaults.execution.max_attempts),
            retry_base_secs: env_or("ORDER_RETRY_BASE_SECS", defaults.execution.retry_base_secs),
            retry_step_secs: env_or("ORDER_RETRY_STEP_SECS", defaults.execution.retry_step_secs),
            quantity_step: env_or("QUANTITY_STEP", defaults.execution.quantity_step),
        };

        let status_config = StatusConfig {
            enabled: env_or("STATUS_ENABLED", defaults.status.enabled),
            url: env::var("STATUS_URL").unwrap_or(defaults.status.url),
            timeout_ms: env_or("STATUS_TIMEOUT_MS", defaults.status.timeout_ms),
            serve: env_or("STATUS_SERVE", defaults.status.serve),
            bind_addr: env::var("STATUS_BIND_ADDR").unwrap_or(defaults.status.bind_addr),
        };

        let ledger_config = LedgerConfig {
            enabled: env_or("LEDGER_ENABLED", defaults.ledger.enabled),
            path: env::var("LEDGER_PATH").unwrap_or(defaults.ledger.path),
        };

        // Create Logging config
        let logging_config = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            to_file: env_or("LOG_TO_FILE", false),
            file_path: env::var("LOG_FILE_PATH").ok(),
        };

        Ok(Config {
            exchange: exchange_config,
            trading: trading_config,
            decision: decision_config,
            risk: risk_config,
            execution: execution_config,
            status: status_config,
            ledger: ledger_config,
            logging: logging_config,
        })
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let mut file = File::open(path).map_err(|e| {
            AppError::Config(format!("Failed to open config file: {}", e))
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| {
            AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Config = serde_json::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file: {}", e))
        })?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            AppError::Config(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, contents).map_err(|e| {
            AppError::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Reject settings the trading loop cannot run with
    pub fn validate(&self) -> AppResult<()> {
        if self.trading.symbols.is_empty() {
            return Err(AppError::Config("No trading symbols configured".to_string()));
        }
        if !self.trading.symbols.iter().any(|s| s.enabled) {
            return Err(AppError::Config("Every trading symbol is disabled".to_string()));
        }
        if let Some(bad) = self
            .trading
            .symbols
            .iter()
            .find(|s| s.quantity_step.map_or(false, |step| step <= Decimal::ZERO))
        {
            return Err(AppError::Config(format!(
                "Quantity step for {} must be positive",
                bad.symbol
            )));
        }
        if let Some(bad) = self
            .trading
            .symbols
            .iter()
            .find(|s| !(0.0..=1.0).contains(&s.allocation))
        {
            return Err(AppError::Config(format!(
                "Allocation for {} must be within [0, 1], got {}",
                bad.symbol, bad.allocation
            )));
        }
        if self.trading.analysis_interval_secs == 0 || self.trading.price_check_interval_secs == 0 {
            return Err(AppError::Config("Loop intervals must be positive".to_string()));
        }
        if self.decision.confidence_threshold <= 0.0 {
            return Err(AppError::Config(
                "CONFIDENCE_THRESHOLD must be positive".to_string(),
            ));
        }
        if self.decision.min_position_size_pct > self.decision.max_position_size_pct {
            return Err(AppError::Config(
                "MIN_POSITION_SIZE_PCT exceeds MAX_POSITION_SIZE_PCT".to_string(),
            ));
        }
        if self.execution.max_attempts == 0 {
            return Err(AppError::Config("ORDER_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        if self.execution.quantity_step <= Decimal::ZERO {
            return Err(AppError::Config("QUANTITY_STEP must be positive".to_string()));
        }
        Ok(())
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> AppResult<()> {
        let mut builder = env_logger::Builder::new();

        // Set log level
        let log_level = match self.logging.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        };

        builder.filter_level(log_level);

        // Configure output
        if self.logging.to_file {
            if let Some(file_path) = &self.logging.file_path {
                let file = File::create(file_path).map_err(|e| {
                    AppError::Config(format!("Failed to create log file: {}", e))
                })?;

                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        builder.init();

        Ok(())
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 0.05,
            max_positions_per_symbol: 1,
            max_total_exposure_pct: 0.8,
            base_profit_pct: 0.03,
            base_stop_loss_pct: 0.02,
            trailing_activation_pct: 0.02,
            trailing_distance_pct: 0.02,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            kelly_win_rate: 0.6,
            kelly_avg_win: 0.03,
            kelly_avg_loss: 0.02,
            max_kelly_fraction: 0.25,
            min_position_size_pct: 0.02,
            max_position_size_pct: 0.15,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_secs: 1,
            retry_step_secs: 1,
            quantity_step: dec!(0.00001),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig {
                name: "binance".to_string(),
                api_key: "".to_string(),
                api_secret: "".to_string(),
                testnet: true,
                request_timeout_secs: 10,
            },
            trading: TradingConfig {
                symbols: vec![
                    SymbolConfig::new("BTCUSDT", 0.4),
                    SymbolConfig::new("ETHUSDT", 0.3),
                    SymbolConfig::new("SOLUSDT", 0.2),
                    SymbolConfig::new("ADAUSDT", 0.1),
                ],
                quote_asset: "USDT".to_string(),
                interval: "1m".to_string(),
                candle_limit: 200,
                analysis_interval_secs: 60,
                price_check_interval_secs: 5,
                auto_trading: false,
            },
            decision: DecisionConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            status: StatusConfig {
                enabled: true,
                url: "http://127.0.0.1:5001/api/update".to_string(),
                timeout_ms: 1000,
                serve: false,
                bind_addr: "127.0.0.1:5001".to_string(),
            },
            ledger: LedgerConfig {
                enabled: true,
                path: "trades.csv".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                to_file: false,
                file_path: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.decision.confidence_threshold, 0.6);
        assert_eq!(config.decision.max_position_size_pct, 0.15);
        assert_eq!(config.decision.min_position_size_pct, 0.02);
        assert_eq!(config.risk.max_daily_loss_pct, 0.05);
        assert_eq!(config.risk.max_positions_per_symbol, 1);
        assert_eq!(config.risk.max_total_exposure_pct, 0.8);
        assert_eq!(config.trading.analysis_interval_secs, 60);
        assert_eq!(config.trading.price_check_interval_secs, 5);
        assert_eq!(config.exchange.request_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_symbols_with_allocations() {
        let symbols = parse_symbols(DEFAULT_SYMBOLS).unwrap();
        assert_eq!(symbols.len(), 4);
        assert_eq!(symbols[0], SymbolConfig::new("BTCUSDT", 0.4));
        assert_eq!(symbols[3].symbol, "ADAUSDT");
    }

    #[test]
    fn test_parse_symbols_splits_remaining_allocation() {
        let symbols = parse_symbols(" btcusdt:0.5, ethusdt ,solusdt").unwrap();
        assert_eq!(symbols[0].symbol, "BTCUSDT");
        assert_eq!(symbols[1].symbol, "ETHUSDT");
        assert!((symbols[1].allocation - 0.25).abs() < 1e-12);
        assert!((symbols[2].allocation - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_parse_symbols_rejects_bad_allocation() {
        assert!(matches!(parse_symbols("BTCUSDT:lots"), Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = Config::default();
        config.trading.symbols.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.decision.min_position_size_pct = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.execution.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trading.symbols[0].allocation = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.risk.max_positions_per_symbol = 3;
        config.execution.quantity_step = dec!(0.001);
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.risk.max_positions_per_symbol, 3);
        assert_eq!(loaded.execution.quantity_step, dec!(0.001));
        assert_eq!(loaded.trading.symbols, config.trading.symbols);
    }

    #[test]
    fn test_symbol_flags_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        Config::default().to_file(&path).unwrap();

        // older files carry neither flag
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let symbols = value["trading"]["symbols"].as_array_mut().unwrap();
        symbols[0].as_object_mut().unwrap().remove("enabled");
        symbols[1]["enabled"] = serde_json::json!(false);
        symbols[2]["quantity_step"] = serde_json::json!("0.01");
        std::fs::write(&path, value.to_string()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert!(loaded.trading.symbols[0].enabled);
        assert!(!loaded.trading.symbols[1].enabled);
        assert_eq!(loaded.trading.symbols[2].quantity_step, Some(dec!(0.01)));
        assert_eq!(loaded.trading.symbols[0].quantity_step, None);
    }

    #[test]
    fn test_validate_rejects_all_disabled() {
        let mut config = Config::default();
        for symbol in &mut config.trading.symbols {
            symbol.enabled = false;
        }
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trading.symbols[0].quantity_step = Some(Decimal::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        assert!(matches!(
            Config::from_file("/nonexistent/ai_trade.json"),
            Err(AppError::Config(_))
        ));
    }
}
