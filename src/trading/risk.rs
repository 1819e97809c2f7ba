// src/trading/risk.rs
use crate::config::RiskConfig;
use crate::domain::errors::{TradingError, TradingResult};
use crate::domain::models::{Balance, MarketRegime};
use crate::trading::position::{PerformanceStats, Position};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::fmt;

const MIN_PROFIT_TARGET_PCT: f64 = 0.02;
const MAX_PROFIT_TARGET_PCT: f64 = 0.15;
const MIN_STOP_LOSS_PCT: f64 = 0.01;
const MAX_STOP_LOSS_PCT: f64 = 0.08;

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Signal,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::Signal => "SIGNAL",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Owns every open position plus the equity and daily-loss bookkeeping
pub struct PositionManager {
    config: RiskConfig,
    positions: HashMap<String, Position>,
    stats: PerformanceStats,
    equity: Option<f64>,
    daily_start_equity: Option<f64>,
    current_day: Option<NaiveDate>,
}

impl PositionManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            positions: HashMap::new(),
            stats: PerformanceStats::default(),
            equity: None,
            daily_start_equity: None,
            current_day: None,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn stats(&self) -> &PerformanceStats {
        &self.stats
    }

    pub fn equity(&self) -> Option<f64> {
        self.equity
    }

    pub fn daily_start_equity(&self) -> Option<f64> {
        self.daily_start_equity
    }

    /// Profit target and stop loss fractions for a new entry.
    ///
    /// Returns `(profit_target_pct, stop_loss_pct)` with the profit target
    /// always strictly above the stop.
    pub fn compute_dynamic_targets(
        &self,
        confidence: f64,
        volatility: f64,
        regime: MarketRegime,
        risk_reward_ratio: f64,
    ) -> (f64, f64) {
        let confidence = finite_or(confidence, 0.0);
        let volatility = finite_or(volatility, 0.02).max(0.0);
        let risk_reward_ratio = finite_or(risk_reward_ratio, 2.0);

        let confidence_mult = 0.5 + 1.5 * confidence.clamp(0.0, 1.0);
        let volatility_mult = (0.8 + 20.0 * volatility).clamp(0.8, 2.8);
        let regime_mult = match regime {
            MarketRegime::Bull => 1.3,
            MarketRegime::Bear => 0.7,
            MarketRegime::Sideways => 1.0,
            MarketRegime::Volatile => 1.2,
        };
        let rr_mult = (risk_reward_ratio / 2.0).clamp(0.5, 1.5);

        let profit = self.config.base_profit_pct * confidence_mult * volatility_mult * regime_mult * rr_mult;
        let stop = self.config.base_stop_loss_pct * volatility_mult * regime_mult
            / confidence_mult.clamp(1.0, 2.0);

        let mut profit = finite_or(profit, MIN_PROFIT_TARGET_PCT)
            .clamp(MIN_PROFIT_TARGET_PCT, MAX_PROFIT_TARGET_PCT);
        let stop = finite_or(stop, MIN_STOP_LOSS_PCT).clamp(MIN_STOP_LOSS_PCT, MAX_STOP_LOSS_PCT);
        if profit <= stop {
            profit = stop * 1.5;
        }

        (profit, stop)
    }

    /// Open a new position or pyramid into an existing one
    pub fn open_or_add(
        &mut self,
        symbol: &str,
        quantity: f64,
        price: f64,
        profit_target_pct: f64,
        stop_loss_pct: f64,
    ) -> &Position {
        let trailing_distance = self.config.trailing_distance_pct;
        let position = self
            .positions
            .entry(symbol.to_string())
            .and_modify(|pos| pos.add(quantity, price, profit_target_pct, stop_loss_pct))
            .or_insert_with(|| {
                Position::new(
                    symbol,
                    quantity,
                    price,
                    profit_target_pct,
                    stop_loss_pct,
                    trailing_distance,
                    Utc::now(),
                )
            });

        log::info!(
            "Position {}: {:.6} @ {:.4} (entries: {}, target: {:.2}%, stop: {:.2}%)",
            symbol,
            position.quantity,
            position.average_entry_price,
            position.entry_count,
            position.profit_target_pct * 100.0,
            position.stop_loss_pct * 100.0
        );
        position
    }

    pub fn should_take_profit(&self, symbol: &str, price: f64) -> bool {
        self.positions
            .get(symbol)
            .map_or(false, |pos| pos.unrealized_pnl_pct(price) >= pos.profit_target_pct)
    }

    pub fn should_stop_loss(&self, symbol: &str, price: f64) -> bool {
        self.positions
            .get(symbol)
            .map_or(false, |pos| -pos.unrealized_pnl_pct(price) >= pos.stop_loss_pct)
    }

    /// Track the high-water mark and ratchet the trailing stop upwards
    pub fn update_trailing_stop(&mut self, symbol: &str, price: f64) {
        let activation = self.config.trailing_activation_pct;
        let Some(pos) = self.positions.get_mut(symbol) else {
            return;
        };

        pos.highest_price_seen = pos.highest_price_seen.max(price);

        if !pos.trailing_stop_active && pos.unrealized_pnl_pct(price) > activation {
            pos.trailing_stop_active = true;
            log::info!("Trailing stop activated for {} at {:.4}", symbol, price);
        }

        if pos.trailing_stop_active {
            let candidate = price * (1.0 - pos.trailing_distance);
            if candidate > pos.stop_price {
                pos.stop_price = candidate;
            }
        }
    }

    pub fn should_trailing_stop(&self, symbol: &str, price: f64) -> bool {
        self.positions
            .get(symbol)
            .map_or(false, |pos| pos.trailing_stop_active && price <= pos.stop_price)
    }

    pub fn mark_price(&mut self, symbol: &str, price: f64) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.last_price = price;
        }
    }

    /// Update marks and trailing state, then check take-profit, stop-loss and
    /// trailing-stop in that order.
    pub fn evaluate_exit(&mut self, symbol: &str, price: f64) -> Option<ExitReason> {
        if !self.has_position(symbol) {
            return None;
        }
        self.mark_price(symbol, price);
        self.update_trailing_stop(symbol, price);

        if self.should_take_profit(symbol, price) {
            Some(ExitReason::TakeProfit)
        } else if self.should_stop_loss(symbol, price) {
            Some(ExitReason::StopLoss)
        } else if self.should_trailing_stop(symbol, price) {
            Some(ExitReason::TrailingStop)
        } else {
            None
        }
    }

    /// Remove the position and book its realized P&L
    pub fn close(&mut self, symbol: &str, exit_price: f64, reason: ExitReason) -> Option<f64> {
        let position = self.positions.remove(symbol)?;
        let pnl = (exit_price - position.average_entry_price) * position.quantity;
        self.stats.record_trade(pnl);

        log::info!(
            "Closed {} ({}): {:.6} @ {:.4} -> {:.4}, P&L {:.4}",
            symbol,
            reason,
            position.quantity,
            position.average_entry_price,
            exit_price,
            pnl
        );
        Some(pnl)
    }

    /// Store the latest equity reading; `None` means the balance fetch failed.
    ///
    /// The first reading of each UTC day becomes that day's starting equity.
    pub fn record_equity(&mut self, equity: Option<f64>, today: NaiveDate) {
        self.equity = equity;
        let Some(value) = equity else {
            return;
        };

        if self.current_day != Some(today) {
            log::info!("Daily starting equity for {}: {:.2}", today, value);
            self.current_day = Some(today);
            self.daily_start_equity = Some(value);
        }
    }

    /// Quote-asset balance plus every open position at its last mark
    pub fn equity_from_balances(&self, balances: &[Balance], quote_asset: &str) -> f64 {
        let quote: f64 = balances
            .iter()
            .filter(|b| b.asset == quote_asset)
            .map(|b| b.total)
            .sum();
        let held: f64 = self.positions.values().map(Position::market_value).sum();
        quote + held
    }

    /// Cost basis of all open positions as a fraction of equity
    pub fn total_exposure_fraction(&self) -> f64 {
        match self.equity {
            Some(equity) if equity > 0.0 => {
                let exposure: f64 = self.positions.values().map(Position::cost_basis).sum();
                exposure / equity
            }
            _ => 0.0,
        }
    }

    pub fn check_daily_loss_limit(&self) -> bool {
        match (self.daily_start_equity, self.equity) {
            (Some(start), Some(current)) if start > 0.0 => {
                (start - current) / start >= self.config.max_daily_loss_pct
            }
            _ => false,
        }
    }

    fn check_entry_gate(&self, symbol: &str) -> TradingResult<()> {
        if self.equity.is_none() {
            return Err(TradingError::RiskManagement("equity unknown".to_string()));
        }
        if self.daily_start_equity.is_none() {
            return Err(TradingError::RiskManagement(
                "daily starting equity unknown".to_string(),
            ));
        }
        if self.check_daily_loss_limit() {
            return Err(TradingError::RiskManagement(
                "daily loss limit reached".to_string(),
            ));
        }

        let entries = self.positions.get(symbol).map_or(0, |pos| pos.entry_count);
        if entries >= self.config.max_positions_per_symbol {
            return Err(TradingError::RiskManagement(format!(
                "{} already has {} entries",
                symbol, entries
            )));
        }

        let exposure = self.total_exposure_fraction();
        if exposure >= self.config.max_total_exposure_pct {
            return Err(TradingError::RiskManagement(format!(
                "total exposure {:.1}% at limit",
                exposure * 100.0
            )));
        }

        Ok(())
    }

    pub fn can_open_new_position(&self, symbol: &str) -> bool {
        match self.check_entry_gate(symbol) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Entry blocked for {}: {}", symbol, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PositionManager {
        PositionManager::new(RiskConfig::default())
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn test_dynamic_targets_profit_above_stop() {
        let pm = manager();
        let regimes = [
            MarketRegime::Bull,
            MarketRegime::Bear,
            MarketRegime::Sideways,
            MarketRegime::Volatile,
        ];
        for confidence in [0.0, 0.3, 0.6, 0.9, 1.0, 1.5] {
            for volatility in [0.0, 0.01, 0.02, 0.05, 0.1, 0.5] {
                for regime in regimes {
                    for rr in [0.0, 0.5, 1.0, 2.0, 3.0, 10.0] {
                        let (profit, stop) = pm.compute_dynamic_targets(confidence, volatility, regime, rr);
                        assert!(profit > stop, "{} {} {:?} {}", confidence, volatility, regime, rr);
                        assert!((0.02..=0.15).contains(&profit));
                        assert!((0.01..=0.08).contains(&stop));
                    }
                }
            }
        }
    }

    #[test]
    fn test_dynamic_targets_confidence_and_volatility() {
        let pm = manager();
        let (high_profit, _) = pm.compute_dynamic_targets(0.9, 0.02, MarketRegime::Bull, 2.5);
        let (low_profit, _) = pm.compute_dynamic_targets(0.3, 0.02, MarketRegime::Sideways, 1.5);
        assert!(high_profit > 0.05);
        assert!(high_profit > low_profit);

        let (_, calm_stop) = pm.compute_dynamic_targets(0.6, 0.01, MarketRegime::Sideways, 2.0);
        let (_, wild_stop) = pm.compute_dynamic_targets(0.6, 0.06, MarketRegime::Sideways, 2.0);
        assert!(wild_stop > calm_stop);
    }

    #[test]
    fn test_dynamic_targets_non_finite_inputs() {
        let pm = manager();
        let (profit, stop) = pm.compute_dynamic_targets(f64::NAN, f64::INFINITY, MarketRegime::Sideways, f64::NAN);
        assert!(profit.is_finite() && stop.is_finite());
        assert!(profit > stop);
    }

    #[test]
    fn test_take_profit_threshold() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.08, 0.03);
        assert!(pm.should_take_profit("BTCUSDT", 54000.0));
        assert!(!pm.should_take_profit("BTCUSDT", 53000.0));
        assert!(!pm.should_take_profit("ETHUSDT", 54000.0));
    }

    #[test]
    fn test_stop_loss_threshold() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.08, 0.03);
        assert!(pm.should_stop_loss("BTCUSDT", 48000.0));
        assert!(!pm.should_stop_loss("BTCUSDT", 49000.0));
        assert!(!pm.should_stop_loss("ETHUSDT", 1.0));
    }

    #[test]
    fn test_pyramiding_merges_position() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.05, 0.03);
        let pos = pm.open_or_add("BTCUSDT", 0.05, 52000.0, 0.08, 0.02);

        assert!((pos.average_entry_price - 50666.67).abs() < 0.01);
        assert_eq!(pos.profit_target_pct, 0.08);
        assert_eq!(pos.stop_loss_pct, 0.02);
        assert_eq!(pm.positions().len(), 1);
    }

    #[test]
    fn test_trailing_stop_lifecycle() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.10, 0.03);

        pm.update_trailing_stop("BTCUSDT", 52000.0);
        assert!(pm.position("BTCUSDT").unwrap().trailing_stop_active);

        pm.update_trailing_stop("BTCUSDT", 53000.0);
        let expected = 53000.0 * 0.98;
        assert!((pm.position("BTCUSDT").unwrap().stop_price - expected).abs() < 1e-9);

        pm.update_trailing_stop("BTCUSDT", 52500.0);
        assert!((pm.position("BTCUSDT").unwrap().stop_price - expected).abs() < 1e-9);
        assert_eq!(pm.position("BTCUSDT").unwrap().highest_price_seen, 53000.0);

        assert!(pm.should_trailing_stop("BTCUSDT", 51900.0));
        assert!(!pm.should_trailing_stop("BTCUSDT", 52000.0));
    }

    #[test]
    fn test_trailing_stop_inactive_below_activation() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.10, 0.03);
        pm.update_trailing_stop("BTCUSDT", 50500.0);
        let pos = pm.position("BTCUSDT").unwrap();
        assert!(!pos.trailing_stop_active);
        assert!((pos.stop_price - 48500.0).abs() < 1e-9);
        assert!(!pm.should_trailing_stop("BTCUSDT", 48000.0));
    }

    #[test]
    fn test_stop_price_never_decreases() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 100.0, 0.5, 0.05);

        let rising: Vec<f64> = (0..50).map(|i| 100.0 + i as f64 * 0.7).collect();
        let choppy = [101.0, 104.0, 99.0, 107.0, 95.0, 110.0, 103.0, 112.0, 90.0, 115.0];

        let mut last_stop = pm.position("BTCUSDT").unwrap().stop_price;
        for price in rising.iter().chain(choppy.iter()) {
            pm.update_trailing_stop("BTCUSDT", *price);
            let stop = pm.position("BTCUSDT").unwrap().stop_price;
            assert!(stop >= last_stop, "stop fell from {} to {} at {}", last_stop, stop, price);
            last_stop = stop;
        }
    }

    #[test]
    fn test_evaluate_exit_order() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.08, 0.03);
        assert_eq!(pm.evaluate_exit("BTCUSDT", 50500.0), None);
        assert_eq!(pm.evaluate_exit("BTCUSDT", 54500.0), Some(ExitReason::TakeProfit));
        assert_eq!(pm.evaluate_exit("BTCUSDT", 48000.0), Some(ExitReason::StopLoss));
        assert_eq!(pm.evaluate_exit("ETHUSDT", 1.0), None);

        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.10, 0.03);
        assert_eq!(pm.evaluate_exit("BTCUSDT", 53000.0), None);
        assert_eq!(pm.evaluate_exit("BTCUSDT", 51500.0), Some(ExitReason::TrailingStop));
        assert_eq!(pm.position("BTCUSDT").unwrap().last_price, 51500.0);
    }

    #[test]
    fn test_close_books_pnl() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.08, 0.03);
        let pnl = pm.close("BTCUSDT", 51000.0, ExitReason::Signal).unwrap();
        assert!((pnl - 100.0).abs() < 1e-9);
        assert!(!pm.has_position("BTCUSDT"));
        assert_eq!(pm.stats().total_trades, 1);
        assert_eq!(pm.stats().winning_trades, 1);
        assert!(pm.close("BTCUSDT", 51000.0, ExitReason::Signal).is_none());
    }

    #[test]
    fn test_exposure_fraction() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.08, 0.03);
        pm.open_or_add("ETHUSDT", 1.0, 3000.0, 0.08, 0.03);
        pm.record_equity(Some(10000.0), today());
        assert!((pm.total_exposure_fraction() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_exposure_zero_when_equity_unknown() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.08, 0.03);
        assert_eq!(pm.total_exposure_fraction(), 0.0);

        pm.record_equity(Some(10000.0), today());
        pm.record_equity(None, today());
        assert_eq!(pm.total_exposure_fraction(), 0.0);
        assert!(!pm.can_open_new_position("ETHUSDT"));
    }

    #[test]
    fn test_daily_loss_limit() {
        let mut pm = manager();
        assert!(!pm.check_daily_loss_limit());

        pm.record_equity(Some(10000.0), today());
        pm.record_equity(Some(9400.0), today());
        assert_eq!(pm.daily_start_equity(), Some(10000.0));
        assert!(pm.check_daily_loss_limit());
        assert!(!pm.can_open_new_position("BTCUSDT"));

        pm.record_equity(Some(9600.0), today());
        assert!(!pm.check_daily_loss_limit());
    }

    #[test]
    fn test_daily_rollover_resets_start() {
        let mut pm = manager();
        pm.record_equity(Some(10000.0), today());
        pm.record_equity(Some(9400.0), today());
        assert!(pm.check_daily_loss_limit());

        let tomorrow = today().succ_opt().unwrap();
        pm.record_equity(Some(9400.0), tomorrow);
        assert_eq!(pm.daily_start_equity(), Some(9400.0));
        assert!(!pm.check_daily_loss_limit());
        assert!(pm.can_open_new_position("BTCUSDT"));
    }

    #[test]
    fn test_can_open_blocked_at_max_exposure() {
        let mut pm = manager();
        pm.record_equity(Some(10000.0), today());
        assert!(pm.can_open_new_position("SOLUSDT"));

        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.08, 0.03);
        pm.open_or_add("ETHUSDT", 1.0, 3000.0, 0.08, 0.03);
        assert!(pm.total_exposure_fraction() >= pm.config().max_total_exposure_pct);
        assert!(!pm.can_open_new_position("SOLUSDT"));

        pm.open_or_add("ADAUSDT", 1000.0, 1.0, 0.08, 0.03);
        assert!(!pm.can_open_new_position("SOLUSDT"));
    }

    #[test]
    fn test_per_symbol_entry_limit() {
        let mut pm = manager();
        pm.record_equity(Some(100_000.0), today());
        pm.open_or_add("BTCUSDT", 0.01, 50000.0, 0.08, 0.03);
        assert!(!pm.can_open_new_position("BTCUSDT"));
        assert!(pm.can_open_new_position("ETHUSDT"));

        let config = RiskConfig {
            max_positions_per_symbol: 2,
            ..RiskConfig::default()
        };
        let mut pm = PositionManager::new(config);
        pm.record_equity(Some(100_000.0), today());
        pm.open_or_add("BTCUSDT", 0.01, 50000.0, 0.08, 0.03);
        assert!(pm.can_open_new_position("BTCUSDT"));
        pm.open_or_add("BTCUSDT", 0.01, 50000.0, 0.08, 0.03);
        assert!(!pm.can_open_new_position("BTCUSDT"));
    }

    #[test]
    fn test_equity_from_balances() {
        let mut pm = manager();
        pm.open_or_add("BTCUSDT", 0.1, 50000.0, 0.08, 0.03);
        pm.mark_price("BTCUSDT", 51000.0);
        let balances = vec![
            Balance::new("USDT", 900.0, 100.0),
            Balance::new("BTC", 0.1, 0.0),
        ];
        let equity = pm.equity_from_balances(&balances, "USDT");
        assert!((equity - 6100.0).abs() < 1e-9);
    }
}
