// src/analysis/mod.rs
pub mod indicators;
pub mod regime;

pub use indicators::{calculate_indicators, IndicatorRow, IndicatorSeries, MIN_CANDLES};
pub use regime::{calculate_signal_strength, detect_market_regime};
