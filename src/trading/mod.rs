// src/trading/mod.rs
pub mod bot;
pub mod decision;
pub mod execution;
pub mod position;
pub mod risk;

pub use bot::TradingBot;
pub use decision::DecisionScorer;
pub use execution::{Backoff, RetryPolicy, TradeExecutor};
pub use position::{PerformanceStats, Position};
pub use risk::{ExitReason, PositionManager};
