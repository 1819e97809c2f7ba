// src/domain/mod.rs
pub mod errors;
pub mod models;

// Re-export common types for convenience
pub use errors::{
    AnalysisError, AnalysisResult, AppError, AppResult, ExchangeError, ExchangeResult,
    LedgerError, LedgerResult, TradingError, TradingResult,
};
pub use models::{
    Balance, Candlestick, Fill, MarketRegime, OrderSide, PriceHistory, SignalStrength, SymbolRules,
    Ticker, TradeAction, TradingDecision,
};
