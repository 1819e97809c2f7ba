// src/trading/execution.rs
use crate::config::ExecutionConfig;
use crate::domain::errors::{ExchangeError, TradingError, TradingResult};
use crate::domain::models::{Fill, OrderSide};
use crate::exchange::client::ExchangeClient;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Delay between order attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    None,
    /// `base + step * attempt`, with `attempt` counted from zero
    Linear { base: Duration, step: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Linear { base, step } => *base + *step * attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::Linear {
                base: Duration::from_secs(config.retry_base_secs),
                step: Duration::from_secs(config.retry_step_secs),
            },
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

/// Round `quantity` down to a multiple of `step`; `None` if nothing is left
pub fn round_down_to_step(quantity: f64, step: Decimal) -> Option<Decimal> {
    if !(quantity > 0.0) || step <= Decimal::ZERO {
        return None;
    }
    let quantity = Decimal::from_f64(quantity)?;
    let rounded = ((quantity / step).floor() * step).normalize();
    if rounded > Decimal::ZERO {
        Some(rounded)
    } else {
        None
    }
}

/// Places market orders with bounded retries
pub struct TradeExecutor {
    exchange: Arc<dyn ExchangeClient>,
    retry: RetryPolicy,
    default_step: Decimal,
    steps: HashMap<String, Decimal>,
}

impl TradeExecutor {
    pub fn new(exchange: Arc<dyn ExchangeClient>, retry: RetryPolicy, default_step: Decimal) -> Self {
        Self {
            exchange,
            retry,
            default_step,
            steps: HashMap::new(),
        }
    }

    /// Use the pair's own lot step instead of the default
    pub fn set_quantity_step(&mut self, symbol: &str, step: Decimal) {
        if step > Decimal::ZERO {
            self.steps.insert(symbol.to_string(), step);
        }
    }

    pub fn quantity_step(&self, symbol: &str) -> Decimal {
        self.steps.get(symbol).copied().unwrap_or(self.default_step)
    }

    /// Place a market order and return its fill.
    ///
    /// A fill with zero quantity counts as a failed attempt. Authentication
    /// and unknown-symbol errors are not retried.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        base_quantity: f64,
    ) -> TradingResult<Fill> {
        let step = self.quantity_step(symbol);
        let quantity = round_down_to_step(base_quantity, step).ok_or_else(|| {
            TradingError::OrderExecution(format!(
                "{} {} quantity {} is below the step {}",
                side, symbol, base_quantity, step
            ))
        })?;

        let mut last_error = String::new();
        for attempt in 0..self.retry.max_attempts {
            match self.exchange.place_market_order(symbol, side, quantity).await {
                Ok(fill) if fill.filled_quantity > 0.0 => {
                    log::info!(
                        "{} {} filled: {} @ {:.4} (order {})",
                        side,
                        symbol,
                        fill.filled_quantity,
                        fill.average_fill_price,
                        fill.order_id
                    );
                    return Ok(fill);
                }
                Ok(fill) => {
                    last_error = format!("order {} filled nothing", fill.order_id);
                    log::warn!(
                        "{} {} attempt {}/{}: {}",
                        side,
                        symbol,
                        attempt + 1,
                        self.retry.max_attempts,
                        last_error
                    );
                }
                Err(e @ (ExchangeError::Authentication(_) | ExchangeError::InvalidSymbol(_))) => {
                    return Err(TradingError::OrderExecution(format!(
                        "{} {} rejected: {}",
                        side, symbol, e
                    )));
                }
                Err(e) => {
                    last_error = e.to_string();
                    log::warn!(
                        "{} {} attempt {}/{} failed: {}",
                        side,
                        symbol,
                        attempt + 1,
                        self.retry.max_attempts,
                        e
                    );
                }
            }

            if attempt + 1 < self.retry.max_attempts {
                sleep(self.retry.backoff.delay(attempt)).await;
            }
        }

        Err(TradingError::OrderExecution(format!(
            "{} {} {} failed after {} attempts: {}",
            side,
            quantity.to_f64().unwrap_or(base_quantity),
            symbol,
            self.retry.max_attempts,
            last_error
        )))
    }
}
