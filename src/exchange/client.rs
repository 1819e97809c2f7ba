// src/exchange/client.rs
use crate::domain::errors::ExchangeResult;
use crate::domain::models::{Balance, Fill, OrderSide, PriceHistory, SymbolRules, Ticker};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Everything the trading loop needs from an exchange
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Get historical klines (candlesticks), oldest first
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<PriceHistory>;

    /// Get the latest trade price and 24h volume
    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    /// Get account balances
    async fn fetch_balance(&self) -> ExchangeResult<Vec<Balance>>;

    /// Lot rules for a pair; `None` when the exchange publishes none
    async fn fetch_symbol_rules(&self, _symbol: &str) -> ExchangeResult<Option<SymbolRules>> {
        Ok(None)
    }

    /// Place a market order for `quantity` units of the base asset
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> ExchangeResult<Fill>;
}
