// src/domain/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Trading error: {0}")]
    Trading(#[from] TradingError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Status server error: {0}")]
    Status(String),
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Order error: {0}")]
    Order(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// Network-level failures that are expected to clear by the next tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Connection(_) | ExchangeError::Timeout(_) | ExchangeError::RateLimit(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum TradingError {
    #[error("Risk management error: {0}")]
    RiskManagement(String),

    #[error("Order execution error: {0}")]
    OrderExecution(String),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Indicator calculation error: {0}")]
    IndicatorCalculation(String),

    #[error("Insufficient data for analysis: need {required} candles, got {available}")]
    InsufficientData { required: usize, available: usize },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger CSV error: {0}")]
    Csv(#[from] csv::Error),
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type ExchangeResult<T> = Result<T, ExchangeError>;
pub type TradingResult<T> = Result<T, TradingError>;
pub type AnalysisResult<T> = Result<T, AnalysisError>;
pub type LedgerResult<T> = Result<T, LedgerError>;
