// src/analysis/indicators.rs
use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::domain::models::PriceHistory;
use ta::indicators::{ExponentialMovingAverage, SimpleMovingAverage};
use ta::Next;

/// Minimum number of candles needed before any indicator row is trusted
pub const MIN_CANDLES: usize = 50;

pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const BB_PERIOD: usize = 20;
pub const BB_STD_MULTIPLIER: f64 = 2.0;
pub const VOLUME_PERIOD: usize = 20;
pub const VOLATILITY_PERIOD: usize = 20;
pub const MOMENTUM_LOOKBACK: usize = 10;

/// Simple Moving Average (SMA), aligned with the input.
///
/// Entries before the first full window are `None`.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(indicator) => indicator,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let avg = indicator.next(value);
            if i + 1 >= period {
                Some(avg)
            } else {
                None
            }
        })
        .collect()
}

/// Exponential Moving Average (EMA) seeded with the first value, aligned with the input
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(indicator) => indicator,
        Err(_) => return vec![None; values.len()],
    };

    values.iter().map(|&value| Some(indicator.next(value))).collect()
}

/// Rolling sample standard deviation (n - 1). A window containing a gap yields `None`.
pub fn rolling_std(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    if period < 2 || values.len() < period {
        return result;
    }

    for end in period..=values.len() {
        let window: Option<Vec<f64>> = values[end - period..end].iter().copied().collect();
        if let Some(window) = window {
            let mean = window.iter().sum::<f64>() / period as f64;
            let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>()
                / (period - 1) as f64;
            result[end - 1] = Some(variance.sqrt());
        }
    }

    result
}

/// Relative Strength Index (RSI) from rolling means of gains and losses
pub fn rsi(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut gains = Vec::with_capacity(prices.len());
    let mut losses = Vec::with_capacity(prices.len());

    for i in 0..prices.len() {
        let change = if i == 0 { 0.0 } else { prices[i] - prices[i - 1] };
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let avg_gains = sma(&gains, period);
    let avg_losses = sma(&losses, period);

    avg_gains
        .into_iter()
        .zip(avg_losses)
        .map(|(gain, loss)| match (gain, loss) {
            (Some(gain), Some(loss)) => {
                if loss.abs() < f64::EPSILON {
                    if gain.abs() < f64::EPSILON {
                        None
                    } else {
                        Some(100.0)
                    }
                } else {
                    let rs = gain / loss;
                    Some(100.0 - (100.0 / (1.0 + rs)))
                }
            }
            _ => None,
        })
        .collect()
}

/// True range per candle; the first candle has no previous close and uses high - low
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let len = high.len().min(low.len()).min(close.len());
    (0..len)
        .map(|i| {
            let high_low = high[i] - low[i];
            if i == 0 {
                high_low
            } else {
                let high_close = (high[i] - close[i - 1]).abs();
                let low_close = (low[i] - close[i - 1]).abs();
                high_low.max(high_close).max(low_close)
            }
        })
        .collect()
}

/// Fractional change against the value `lookback` steps earlier
pub fn pct_change(values: &[f64], lookback: usize) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            if lookback == 0 || i < lookback {
                return None;
            }
            let previous = values[i - lookback];
            if previous == 0.0 {
                None
            } else {
                Some(value / previous - 1.0)
            }
        })
        .collect()
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !denominator.is_finite() {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// Every derived field for one candle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorRow {
    pub open_time: i64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub sma_5: Option<f64>,
    pub sma_10: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_width: Option<f64>,
    pub bb_position: Option<f64>,
    pub atr: Option<f64>,
    pub volume_sma: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub momentum: Option<f64>,
    pub price_change: Option<f64>,
    pub volatility: Option<f64>,
}

/// Indicator rows aligned one-to-one with the candles they were computed from
#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub symbol: String,
    pub rows: Vec<IndicatorRow>,
}

impl IndicatorSeries {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest(&self) -> Option<&IndicatorRow> {
        self.rows.last()
    }

    /// The last `n` rows (or all of them if there are fewer)
    pub fn tail(&self, n: usize) -> &[IndicatorRow] {
        let start = self.rows.len().saturating_sub(n);
        &self.rows[start..]
    }
}

/// Compute every indicator for a candle history.
///
/// Histories shorter than [`MIN_CANDLES`] are rejected with
/// [`AnalysisError::InsufficientData`] rather than producing partial numbers.
pub fn calculate_indicators(history: &PriceHistory) -> AnalysisResult<IndicatorSeries> {
    if history.len() < MIN_CANDLES {
        return Err(AnalysisError::InsufficientData {
            required: MIN_CANDLES,
            available: history.len(),
        });
    }

    let close = history.close_prices();
    let high = history.high_prices();
    let low = history.low_prices();
    let volume = history.volume();

    if close.iter().chain(&high).chain(&low).chain(&volume).any(|v| !v.is_finite()) {
        return Err(AnalysisError::IndicatorCalculation(format!(
            "non-finite candle values for {}",
            history.symbol
        )));
    }

    let sma_5 = sma(&close, 5);
    let sma_10 = sma(&close, 10);
    let sma_20 = sma(&close, 20);
    let sma_50 = sma(&close, 50);
    let ema_12 = ema(&close, 12);
    let ema_26 = ema(&close, 26);
    let rsi = rsi(&close, RSI_PERIOD);

    let macd: Vec<Option<f64>> = ema_12
        .iter()
        .zip(&ema_26)
        .map(|(fast, slow)| Some((*fast)? - (*slow)?))
        .collect();
    // EMAs are defined from the first candle, so the MACD line has no gaps
    let macd_values: Vec<f64> = macd.iter().map(|v| v.unwrap_or(0.0)).collect();
    let macd_signal = ema(&macd_values, 9);

    let bb_middle = sma(&close, BB_PERIOD);
    let close_opt: Vec<Option<f64>> = close.iter().copied().map(Some).collect();
    let bb_std = rolling_std(&close_opt, BB_PERIOD);

    let atr = sma(&true_range(&high, &low, &close), ATR_PERIOD);
    let volume_sma = sma(&volume, VOLUME_PERIOD);
    let momentum = pct_change(&close, MOMENTUM_LOOKBACK);
    let price_change = pct_change(&close, 1);
    let volatility = rolling_std(&price_change, VOLATILITY_PERIOD);

    let rows = history
        .candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let (bb_upper, bb_lower) = match (bb_middle[i], bb_std[i]) {
                (Some(middle), Some(std)) => (
                    Some(middle + BB_STD_MULTIPLIER * std),
                    Some(middle - BB_STD_MULTIPLIER * std),
                ),
                _ => (None, None),
            };
            let bb_width = match (bb_upper, bb_lower, bb_middle[i]) {
                (Some(upper), Some(lower), Some(middle)) => ratio(upper - lower, middle),
                _ => None,
            };
            let bb_position = match (bb_upper, bb_lower) {
                (Some(upper), Some(lower)) => ratio(candle.close - lower, upper - lower),
                _ => None,
            };
            let macd_histogram = match (macd[i], macd_signal[i]) {
                (Some(line), Some(signal)) => Some(line - signal),
                _ => None,
            };
            let volume_ratio = volume_sma[i].and_then(|avg| ratio(candle.volume, avg));

            IndicatorRow {
                open_time: candle.open_time,
                close: candle.close,
                high: candle.high,
                low: candle.low,
                volume: candle.volume,
                sma_5: sma_5[i],
                sma_10: sma_10[i],
                sma_20: sma_20[i],
                sma_50: sma_50[i],
                ema_12: ema_12[i],
                ema_26: ema_26[i],
                rsi: rsi[i],
                macd: macd[i],
                macd_signal: macd_signal[i],
                macd_histogram,
                bb_middle: bb_middle[i],
                bb_upper,
                bb_lower,
                bb_width,
                bb_position,
                atr: atr[i],
                volume_sma: volume_sma[i],
                volume_ratio,
                momentum: momentum[i],
                price_change: price_change[i],
                volatility: volatility[i],
            }
        })
        .collect();

    Ok(IndicatorSeries {
        symbol: history.symbol.clone(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Candlestick;

    fn history_from_closes(closes: &[f64]) -> PriceHistory {
        let mut history = PriceHistory::new("TESTUSDT", "1m");
        for (i, &close) in closes.iter().enumerate() {
            history.add_candle(Candlestick {
                open_time: i as i64 * 60_000,
                close_time: i as i64 * 60_000 + 59_999,
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 100.0 + i as f64,
            });
        }
        history
    }

    #[test]
    fn test_sma_alignment() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);
        assert_eq!(result, vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_sma_window_larger_than_input() {
        let result = sma(&[1.0, 2.0], 5);
        assert!(result.iter().all(Option::is_none));
        assert!(sma(&[1.0, 2.0], 0).iter().all(Option::is_none));
    }

    #[test]
    fn test_ema_starts_at_first_value() {
        let result = ema(&[10.0, 20.0, 20.0], 12);
        assert_eq!(result[0], Some(10.0));
        let k = 2.0 / 13.0;
        let second = k * 20.0 + (1.0 - k) * 10.0;
        assert!((result[1].unwrap() - second).abs() < 1e-9);
        assert!(result[2].unwrap() > second);
    }

    #[test]
    fn test_rolling_std_is_sample_std() {
        let values: Vec<Option<f64>> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
            .iter()
            .copied()
            .map(Some)
            .collect();
        let result = rolling_std(&values, 8);
        // population std is 2.0; sample std is sqrt(32 / 7)
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((result[7].unwrap() - expected).abs() < 1e-12);
        assert!(result[6].is_none());
    }

    #[test]
    fn test_rolling_std_gap_in_window() {
        let values = vec![None, Some(1.0), Some(2.0), Some(3.0)];
        let result = rolling_std(&values, 3);
        assert_eq!(result[2], None);
        assert!(result[3].is_some());
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let prices: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let result = rsi(&prices, 14);
        assert_eq!(result[19], Some(100.0));
    }

    #[test]
    fn test_rsi_flat_prices_undefined() {
        let prices = vec![5.0; 20];
        assert!(rsi(&prices, 14).iter().all(Option::is_none));
    }

    #[test]
    fn test_rsi_balanced_moves_is_50() {
        let prices: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let value = rsi(&prices, 14)[29].unwrap();
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let high = [10.0, 12.0];
        let low = [9.0, 11.5];
        let close = [9.5, 12.0];
        assert_eq!(true_range(&high, &low, &close), vec![1.0, 2.5]);
    }

    #[test]
    fn test_short_history_is_insufficient() {
        for len in [0, 1, 20, MIN_CANDLES - 1] {
            let closes: Vec<f64> = (0..len).map(|i| 100.0 + i as f64).collect();
            match calculate_indicators(&history_from_closes(&closes)) {
                Err(AnalysisError::InsufficientData { required, available }) => {
                    assert_eq!(required, MIN_CANDLES);
                    assert_eq!(available, len);
                }
                other => panic!("expected insufficient data, got {:?}", other.map(|s| s.len())),
            }
        }
    }

    #[test]
    fn test_full_history_populates_latest_row() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 2.0).collect();
        let series = calculate_indicators(&history_from_closes(&closes)).unwrap();
        assert_eq!(series.len(), 60);

        let latest = series.latest().unwrap();
        assert!(latest.sma_50.is_some());
        assert!(latest.rsi.is_some());
        assert!(latest.macd_signal.is_some());
        assert!(latest.atr.is_some());
        assert!(latest.volatility.is_some());
        let position = latest.bb_position.unwrap();
        assert!(latest.bb_lower.unwrap() < latest.bb_upper.unwrap());
        assert!(position.is_finite());

        // first rows stay undefined until their windows fill
        assert!(series.rows[0].sma_5.is_none());
        assert!(series.rows[48].sma_50.is_none());
        assert_eq!(series.tail(20).len(), 20);
    }

    #[test]
    fn test_momentum_and_price_change() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let series = calculate_indicators(&history_from_closes(&closes)).unwrap();
        let latest = series.latest().unwrap();
        assert!((latest.price_change.unwrap() - (159.0 / 158.0 - 1.0)).abs() < 1e-12);
        assert!((latest.momentum.unwrap() - (159.0 / 149.0 - 1.0)).abs() < 1e-12);
    }
}
