// src/trading/decision.rs
use crate::analysis::indicators::{IndicatorRow, IndicatorSeries};
use crate::config::DecisionConfig;
use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::domain::models::{MarketRegime, SignalStrength, TradeAction, TradingDecision};

const STOP_TARGET_LOOKBACK: usize = 20;
const DEFAULT_VOLATILITY: f64 = 0.02;
const ATR_STOP_MULTIPLIER: f64 = 2.0;
const REWARD_MULTIPLIER: f64 = 2.5;

/// Additive point scorer over the latest indicator row
pub struct DecisionScorer {
    config: DecisionConfig,
}

impl DecisionScorer {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> f64 {
        self.config.confidence_threshold
    }

    /// Raw score plus the rules that fired, in evaluation order.
    ///
    /// The score is unbounded; rules whose inputs are missing are skipped.
    pub fn score(&self, row: &IndicatorRow, regime: MarketRegime) -> (f64, Vec<&'static str>) {
        let mut score = 0.0;
        let mut reasons = Vec::new();

        if let (Some(sma_5), Some(sma_20)) = (row.sma_5, row.sma_20) {
            if sma_5 > sma_20 {
                score += 0.3;
                reasons.push("Uptrend (SMA5 > SMA20)");
            } else {
                score -= 0.2;
                reasons.push("Downtrend (SMA5 < SMA20)");
            }
        }

        if let Some(rsi) = row.rsi {
            if rsi < 30.0 {
                score += 0.2;
                reasons.push("Oversold (RSI < 30)");
            } else if rsi > 70.0 {
                score -= 0.2;
                reasons.push("Overbought (RSI > 70)");
            } else {
                score += 0.1;
                reasons.push("Neutral RSI");
            }
        }

        if let (Some(macd), Some(signal)) = (row.macd, row.macd_signal) {
            if macd > signal {
                score += 0.25;
                reasons.push("MACD Bullish");
            } else {
                score -= 0.15;
                reasons.push("MACD Bearish");
            }
        }

        if let Some(position) = row.bb_position {
            if position < 0.2 {
                score += 0.25;
                reasons.push("Near Lower Bollinger Band");
            } else if position > 0.8 {
                score -= 0.25;
                reasons.push("Near Upper Bollinger Band");
            } else {
                score += 0.1;
                reasons.push("Middle Bollinger Band");
            }
        }

        if row.volume_ratio.map_or(false, |ratio| ratio > 1.2) {
            score += 0.1;
            reasons.push("High Volume Confirmation");
        }

        match regime {
            MarketRegime::Bull => {
                score += 0.1;
                reasons.push("Bull Market Regime");
            }
            MarketRegime::Bear => {
                score -= 0.1;
                reasons.push("Bear Market Regime");
            }
            MarketRegime::Volatile => {
                score *= 0.8;
                reasons.push("Volatile Market - Reduced Confidence");
            }
            MarketRegime::Sideways => {}
        }

        (score, reasons)
    }

    pub fn action_for(&self, score: f64) -> TradeAction {
        let threshold = self.config.confidence_threshold;
        if score > threshold {
            TradeAction::Buy
        } else if score < -threshold {
            TradeAction::Sell
        } else {
            TradeAction::Hold
        }
    }

    /// Kelly fraction from the configured win statistics, capped
    pub fn kelly_fraction(&self) -> f64 {
        let c = &self.config;
        if c.kelly_avg_win <= 0.0 {
            return 0.0;
        }
        let kelly = (c.kelly_win_rate * c.kelly_avg_win - (1.0 - c.kelly_win_rate) * c.kelly_avg_loss)
            / c.kelly_avg_win;
        kelly.clamp(0.0, c.max_kelly_fraction)
    }

    /// Quote-currency size for an entry
    pub fn position_size_usd(
        &self,
        equity: f64,
        base_allocation: f64,
        confidence: f64,
        volatility: f64,
    ) -> f64 {
        if !(equity > 0.0) {
            return 0.0;
        }

        let confidence_mult = confidence * confidence;
        let volatility_adjustment = (1.0 - volatility * 2.0).max(0.5);
        let fraction = base_allocation * confidence_mult * volatility_adjustment * self.kelly_fraction();
        let fraction = fraction.clamp(
            self.config.min_position_size_pct,
            self.config.max_position_size_pct,
        );

        equity * fraction
    }

    /// Build the full decision for one symbol from its indicator series.
    ///
    /// `price` is the live ticker price; `equity` may be zero when the balance
    /// is unknown, which yields a zero position size.
    pub fn decide(
        &self,
        series: &IndicatorSeries,
        regime: MarketRegime,
        signal_strength: SignalStrength,
        price: f64,
        equity: f64,
        base_allocation: f64,
        timestamp: i64,
    ) -> AnalysisResult<TradingDecision> {
        let latest = series.latest().ok_or(AnalysisError::InsufficientData {
            required: 1,
            available: 0,
        })?;

        let (raw_score, reasons) = self.score(latest, regime);
        let action = self.action_for(raw_score);
        let confidence = raw_score.abs();
        let volatility = latest.volatility.unwrap_or(DEFAULT_VOLATILITY);

        let position_size_usd = self.position_size_usd(equity, base_allocation, confidence, volatility);
        let (stop_loss, take_profit) = stop_and_target(series, action, price);

        let (risk, reward) = match action {
            TradeAction::Buy => (price - stop_loss, take_profit - price),
            _ => (stop_loss - price, price - take_profit),
        };
        let risk_reward_ratio = if risk > 0.0 { reward / risk } else { 0.0 };

        Ok(TradingDecision {
            symbol: series.symbol.clone(),
            action,
            confidence,
            raw_score,
            price,
            position_size_usd,
            stop_loss,
            take_profit,
            risk_reward_ratio,
            volatility,
            reasoning: reasons.join("; "),
            market_regime: regime,
            signal_strength,
            timestamp,
        })
    }
}

/// ATR and swing based stop and target prices
pub fn stop_and_target(series: &IndicatorSeries, action: TradeAction, price: f64) -> (f64, f64) {
    let recent = series.tail(STOP_TARGET_LOOKBACK);
    let atr = match recent.last().and_then(|row| row.atr) {
        Some(atr) => atr,
        None => return (price * 0.98, price * 1.02),
    };

    match action {
        TradeAction::Buy => {
            let recent_low = recent.iter().map(|r| r.low).fold(f64::INFINITY, f64::min);
            let stop = (recent_low * 0.995).max(price - atr * ATR_STOP_MULTIPLIER);
            let target = price + (price - stop) * REWARD_MULTIPLIER;
            (stop, target)
        }
        _ => {
            let recent_high = recent.iter().map(|r| r.high).fold(f64::NEG_INFINITY, f64::max);
            let stop = (recent_high * 1.005).min(price + atr * ATR_STOP_MULTIPLIER);
            let target = price - (stop - price) * REWARD_MULTIPLIER;
            (stop, target)
        }
    }
}
