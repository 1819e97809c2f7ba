// src/domain/models.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market Data Structures
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candlestick {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// Generic price history container for technical analysis
#[derive(Debug, Clone)]
pub struct PriceHistory {
    pub symbol: String,
    pub interval: String,
    pub candles: Vec<Candlestick>,
}

impl PriceHistory {
    pub fn new(symbol: &str, interval: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            candles: Vec::new(),
        }
    }

    pub fn add_candle(&mut self, candle: Candlestick) {
        self.candles.push(candle);
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn close_prices(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn high_prices(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn low_prices(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn volume(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }
}

/// Latest price snapshot for a symbol
#[derive(Debug, Clone, Default)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub volume: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
    pub total: f64,
}

impl Balance {
    pub fn new(asset: &str, free: f64, locked: f64) -> Self {
        Self {
            asset: asset.to_string(),
            free,
            locked,
            total: free + locked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lot rules for one trading pair
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRules {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Order quantities must be a multiple of this
    pub quantity_step: Option<Decimal>,
}

/// Normalized result of a market order
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: String,
    /// Base asset received (buys) or given up (sells), net of base-asset fees
    pub filled_quantity: f64,
    pub average_fill_price: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
            TradeAction::Hold => write!(f, "HOLD"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Bull,
    Bear,
    Sideways,
    Volatile,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Bull => "bull",
            MarketRegime::Bear => "bear",
            MarketRegime::Sideways => "sideways",
            MarketRegime::Volatile => "volatile",
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignalStrength::Weak => write!(f, "WEAK"),
            SignalStrength::Moderate => write!(f, "MODERATE"),
            SignalStrength::Strong => write!(f, "STRONG"),
            SignalStrength::VeryStrong => write!(f, "VERY_STRONG"),
        }
    }
}

/// Per-symbol, per-tick output of the decision scorer
#[derive(Debug, Clone, Serialize)]
pub struct TradingDecision {
    pub symbol: String,
    pub action: TradeAction,
    /// Absolute value of `raw_score`; not bounded to 1.0
    pub confidence: f64,
    pub raw_score: f64,
    pub price: f64,
    pub position_size_usd: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward_ratio: f64,
    pub volatility: f64,
    pub reasoning: String,
    pub market_regime: MarketRegime,
    pub signal_strength: SignalStrength,
    pub timestamp: i64,
}
