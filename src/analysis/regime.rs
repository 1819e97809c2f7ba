// src/analysis/regime.rs
use crate::analysis::indicators::{IndicatorSeries, MIN_CANDLES};
use crate::domain::models::{MarketRegime, SignalStrength};

const REGIME_LOOKBACK: usize = 20;
const VOLUME_TREND_WINDOW: usize = 5;
const VOLATILITY_THRESHOLD: f64 = 0.05;
const BB_WIDTH_THRESHOLD: f64 = 0.1;
const VOLUME_TREND_THRESHOLD: f64 = 1.2;

const MIN_ROWS_FOR_STRENGTH: usize = 20;
const MAX_CONFIRMATIONS: usize = 8;

/// Classify the recent candles into a market regime.
///
/// Volatility is checked first and overrides any trend reading.
pub fn detect_market_regime(series: &IndicatorSeries) -> MarketRegime {
    if series.len() < MIN_CANDLES {
        return MarketRegime::Sideways;
    }

    let recent = series.tail(REGIME_LOOKBACK);
    let latest = match recent.last() {
        Some(row) => row,
        None => return MarketRegime::Sideways,
    };

    let volatile = latest.volatility.map_or(false, |v| v > VOLATILITY_THRESHOLD)
        || latest.bb_width.map_or(false, |w| w > BB_WIDTH_THRESHOLD);
    if volatile {
        return MarketRegime::Volatile;
    }

    let sma_20 = match latest.sma_20 {
        Some(value) => value,
        None => return MarketRegime::Sideways,
    };
    let sma_50 = latest.sma_50.unwrap_or(sma_20);
    let price = latest.close;

    let avg_volume = recent.iter().map(|r| r.volume).sum::<f64>() / recent.len() as f64;
    let tail_start = recent.len().saturating_sub(VOLUME_TREND_WINDOW);
    let tail = &recent[tail_start..];
    let recent_volume = tail.iter().map(|r| r.volume).sum::<f64>() / tail.len() as f64;
    let volume_trend = if avg_volume > 0.0 {
        recent_volume / avg_volume
    } else {
        1.0
    };

    if price > sma_20 && sma_20 > sma_50 && volume_trend > VOLUME_TREND_THRESHOLD {
        MarketRegime::Bull
    } else if price < sma_20 && sma_20 < sma_50 && volume_trend > VOLUME_TREND_THRESHOLD {
        MarketRegime::Bear
    } else {
        MarketRegime::Sideways
    }
}

/// Count independent confirmations on the latest candle and bucket the ratio
pub fn calculate_signal_strength(series: &IndicatorSeries) -> SignalStrength {
    if series.len() < MIN_ROWS_FOR_STRENGTH {
        return SignalStrength::Weak;
    }
    let latest = match series.latest() {
        Some(row) => row,
        None => return SignalStrength::Weak,
    };

    let checks = [
        latest.rsi.map_or(false, |rsi| rsi > 30.0 && rsi < 70.0),
        matches!((latest.macd, latest.macd_signal), (Some(m), Some(s)) if m > s),
        latest.bb_position.map_or(false, |p| p > 0.2 && p < 0.8),
        latest.volume_ratio.map_or(false, |r| r > 1.1),
        matches!((latest.sma_5, latest.sma_20), (Some(fast), Some(slow)) if fast > slow),
        latest.momentum.map_or(false, |m| m.abs() > 0.02),
        latest.atr.map_or(false, |atr| {
            if latest.close <= 0.0 {
                return false;
            }
            let atr_pct = atr / latest.close;
            atr_pct > 0.01 && atr_pct < 0.05
        }),
        latest.price_change.map_or(false, |c| c.abs() > 0.005),
    ];

    let confirmations = checks.iter().filter(|passed| **passed).count();
    strength_from_confirmations(confirmations)
}

pub fn strength_from_confirmations(confirmations: usize) -> SignalStrength {
    let ratio = confirmations as f64 / MAX_CONFIRMATIONS as f64;
    if ratio >= 0.875 {
        SignalStrength::VeryStrong
    } else if ratio >= 0.75 {
        SignalStrength::Strong
    } else if ratio >= 0.5 {
        SignalStrength::Moderate
    } else {
        SignalStrength::Weak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::indicators::IndicatorRow;

    fn series_with(len: usize, latest: IndicatorRow, volume: impl Fn(usize) -> f64) -> IndicatorSeries {
        let mut rows: Vec<IndicatorRow> = (0..len)
            .map(|i| IndicatorRow {
                close: latest.close,
                volume: volume(i),
                ..Default::default()
            })
            .collect();
        let last_volume = rows[len - 1].volume;
        rows[len - 1] = IndicatorRow {
            volume: last_volume,
            ..latest
        };
        IndicatorSeries {
            symbol: "TESTUSDT".to_string(),
            rows,
        }
    }

    // last five candles trade at double volume
    fn rising_volume(len: usize) -> impl Fn(usize) -> f64 {
        move |i| if i + 5 >= len { 200.0 } else { 100.0 }
    }

    #[test]
    fn test_short_series_is_sideways() {
        let latest = IndicatorRow {
            close: 110.0,
            sma_20: Some(105.0),
            sma_50: Some(100.0),
            ..Default::default()
        };
        let series = series_with(30, latest, rising_volume(30));
        assert_eq!(detect_market_regime(&series), MarketRegime::Sideways);
    }

    #[test]
    fn test_bull_regime() {
        let latest = IndicatorRow {
            close: 110.0,
            sma_20: Some(105.0),
            sma_50: Some(100.0),
            volatility: Some(0.01),
            bb_width: Some(0.05),
            ..Default::default()
        };
        let series = series_with(60, latest, rising_volume(60));
        assert_eq!(detect_market_regime(&series), MarketRegime::Bull);
    }

    #[test]
    fn test_bear_regime() {
        let latest = IndicatorRow {
            close: 90.0,
            sma_20: Some(95.0),
            sma_50: Some(100.0),
            ..Default::default()
        };
        let series = series_with(60, latest, rising_volume(60));
        assert_eq!(detect_market_regime(&series), MarketRegime::Bear);
    }

    #[test]
    fn test_trend_without_volume_is_sideways() {
        let latest = IndicatorRow {
            close: 110.0,
            sma_20: Some(105.0),
            sma_50: Some(100.0),
            ..Default::default()
        };
        let series = series_with(60, latest, |_| 100.0);
        assert_eq!(detect_market_regime(&series), MarketRegime::Sideways);
    }

    #[test]
    fn test_volatility_overrides_bull() {
        let latest = IndicatorRow {
            close: 110.0,
            sma_20: Some(105.0),
            sma_50: Some(100.0),
            volatility: Some(0.06),
            ..Default::default()
        };
        let series = series_with(60, latest.clone(), rising_volume(60));
        assert_eq!(detect_market_regime(&series), MarketRegime::Volatile);

        let wide_bands = IndicatorRow {
            volatility: Some(0.01),
            bb_width: Some(0.15),
            ..latest
        };
        let series = series_with(60, wide_bands, rising_volume(60));
        assert_eq!(detect_market_regime(&series), MarketRegime::Volatile);
    }

    #[test]
    fn test_missing_sma_50_falls_back_to_sma_20() {
        // sma_50 defaults to sma_20, so the strict ordering cannot hold
        let latest = IndicatorRow {
            close: 110.0,
            sma_20: Some(105.0),
            sma_50: None,
            ..Default::default()
        };
        let series = series_with(60, latest, rising_volume(60));
        assert_eq!(detect_market_regime(&series), MarketRegime::Sideways);
    }

    #[test]
    fn test_strength_tiers() {
        assert_eq!(strength_from_confirmations(0), SignalStrength::Weak);
        assert_eq!(strength_from_confirmations(3), SignalStrength::Weak);
        assert_eq!(strength_from_confirmations(4), SignalStrength::Moderate);
        assert_eq!(strength_from_confirmations(5), SignalStrength::Moderate);
        assert_eq!(strength_from_confirmations(6), SignalStrength::Strong);
        assert_eq!(strength_from_confirmations(7), SignalStrength::VeryStrong);
        assert_eq!(strength_from_confirmations(8), SignalStrength::VeryStrong);
    }

    #[test]
    fn test_all_confirmations_very_strong() {
        let latest = IndicatorRow {
            close: 100.0,
            rsi: Some(55.0),
            macd: Some(1.0),
            macd_signal: Some(0.5),
            bb_position: Some(0.5),
            volume_ratio: Some(1.5),
            sma_5: Some(101.0),
            sma_20: Some(99.0),
            momentum: Some(0.03),
            atr: Some(2.0),
            price_change: Some(0.01),
            ..Default::default()
        };
        let series = series_with(25, latest, |_| 100.0);
        assert_eq!(calculate_signal_strength(&series), SignalStrength::VeryStrong);
    }

    #[test]
    fn test_missing_values_do_not_confirm() {
        let latest = IndicatorRow {
            close: 100.0,
            rsi: Some(55.0),
            macd: Some(1.0),
            macd_signal: Some(0.5),
            bb_position: Some(0.5),
            ..Default::default()
        };
        let series = series_with(25, latest, |_| 100.0);
        assert_eq!(calculate_signal_strength(&series), SignalStrength::Weak);
    }

    #[test]
    fn test_too_few_rows_is_weak() {
        let latest = IndicatorRow {
            close: 100.0,
            rsi: Some(55.0),
            ..Default::default()
        };
        let series = series_with(10, latest, |_| 100.0);
        assert_eq!(calculate_signal_strength(&series), SignalStrength::Weak);
    }
}
