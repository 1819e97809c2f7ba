// src/exchange/binance.rs
use crate::domain::errors::{ExchangeError, ExchangeResult};
use crate::domain::models::{
    Balance, Candlestick, Fill, OrderSide, PriceHistory, SymbolRules, Ticker,
};
use crate::exchange::client::ExchangeClient;
use async_trait::async_trait;
use binance_spot_connector_rust::{
    http::{
        error::{ClientError, HttpError},
        request::Request,
        Credentials,
    },
    hyper::{BinanceHttpClient, Error as BinanceError},
    market::{self, klines::KlineInterval},
    trade::{
        self,
        order::{NewOrderResponseType, Side},
    },
};
use hyper::client::HttpConnector;
use hyper_tls::HttpsConnector;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};

const TESTNET_URL: &str = "https://testnet.binance.vision";

/// Binance spot REST client
pub struct BinanceClient {
    client: BinanceHttpClient<HttpsConnector<HttpConnector>>,
    request_timeout: Duration,
    rules: RwLock<HashMap<String, SymbolRules>>,
}

impl BinanceClient {
    pub fn new(api_key: &str, api_secret: &str, testnet: bool, request_timeout_secs: u64) -> Self {
        let credentials = Credentials::from_hmac(api_key.to_string(), api_secret.to_string());
        let client = if testnet {
            BinanceHttpClient::with_url(TESTNET_URL)
        } else {
            BinanceHttpClient::default()
        };

        Self {
            client: client.credentials(credentials),
            request_timeout: Duration::from_secs(request_timeout_secs),
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Base asset of a pair, from cached exchange info
    async fn base_asset(&self, symbol: &str) -> Option<String> {
        if let Some(rules) = self.rules.read().await.get(symbol) {
            return Some(rules.base_asset.clone());
        }
        match self.fetch_symbol_rules(symbol).await {
            Ok(rules) => rules.map(|r| r.base_asset),
            Err(e) => {
                log::warn!("No exchange info for {}, fees not netted: {}", symbol, e);
                None
            }
        }
    }

    /// Send a request and read the body, bounded by the request timeout
    async fn send<R: Into<Request> + Send>(&self, request: R) -> ExchangeResult<String> {
        let call = async {
            self.client
                .send(request)
                .await?
                .into_body_str()
                .await
        };

        match timeout(self.request_timeout, call).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(map_binance_error(e)),
            Err(_) => Err(ExchangeError::Timeout(self.request_timeout.as_secs())),
        }
    }
}

pub fn kline_interval(interval: &str) -> ExchangeResult<KlineInterval> {
    match interval {
        "1m" => Ok(KlineInterval::Minutes1),
        "5m" => Ok(KlineInterval::Minutes5),
        "15m" => Ok(KlineInterval::Minutes15),
        "1h" => Ok(KlineInterval::Hours1),
        "4h" => Ok(KlineInterval::Hours4),
        "1d" => Ok(KlineInterval::Days1),
        _ => Err(ExchangeError::Api(format!("Invalid interval: {}", interval))),
    }
}

fn classify_api_error(status_code: u16, code: Option<i64>, message: String) -> ExchangeError {
    match (status_code, code) {
        (401, _) | (_, Some(-2014)) | (_, Some(-2015)) => ExchangeError::Authentication(message),
        (418, _) | (429, _) => ExchangeError::RateLimit(message),
        (_, Some(-1121)) => ExchangeError::InvalidSymbol(message),
        _ => ExchangeError::Api(format!("HTTP {}: {}", status_code, message)),
    }
}

fn map_binance_error(error: BinanceError) -> ExchangeError {
    match error {
        BinanceError::Client(ClientError::Structured(HttpError {
            status_code, data, ..
        })) => classify_api_error(status_code, Some(data.code as i64), data.message),
        BinanceError::Client(ClientError::Raw(HttpError {
            status_code, data, ..
        })) => classify_api_error(status_code, None, data),
        BinanceError::Server(HttpError {
            status_code, data, ..
        }) => ExchangeError::Connection(format!("server error {}: {}", status_code, data)),
        BinanceError::InvalidApiSecret => {
            ExchangeError::Authentication("API secret is not valid".to_string())
        }
        BinanceError::Send(e) => ExchangeError::Connection(e.to_string()),
        BinanceError::Parse(e) => ExchangeError::Parse(e.to_string()),
    }
}

/// Order endpoints report generic API failures as order rejections
fn order_error(error: ExchangeError) -> ExchangeError {
    match error {
        ExchangeError::Api(msg) => ExchangeError::Order(msg),
        other => other,
    }
}

fn parse_f64(value: &Value, field: &str) -> ExchangeResult<f64> {
    match value {
        Value::String(s) => s
            .parse()
            .map_err(|_| ExchangeError::Parse(format!("Invalid {}: {}", field, s))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExchangeError::Parse(format!("Invalid {}: {}", field, n))),
        _ => Err(ExchangeError::Parse(format!("Missing {}", field))),
    }
}

fn parse_decimal(value: &Value, field: &str) -> ExchangeResult<Decimal> {
    let raw = value
        .as_str()
        .ok_or_else(|| ExchangeError::Parse(format!("Missing {}", field)))?;
    Decimal::from_str(raw).map_err(|e| ExchangeError::Parse(format!("Invalid {}: {}", field, e)))
}

/// Parse the `/api/v3/klines` array-of-arrays body
pub fn parse_klines(symbol: &str, interval: &str, body: &str) -> ExchangeResult<PriceHistory> {
    let raw: Vec<Vec<Value>> =
        serde_json::from_str(body).map_err(|e| ExchangeError::Parse(e.to_string()))?;

    let mut history = PriceHistory::new(symbol, interval);
    for kline in raw {
        if kline.len() < 7 {
            return Err(ExchangeError::Parse("Invalid kline format".to_string()));
        }
        let open_time = kline[0]
            .as_i64()
            .ok_or_else(|| ExchangeError::Parse("Invalid open time in kline".to_string()))?;
        let close_time = kline[6]
            .as_i64()
            .ok_or_else(|| ExchangeError::Parse("Invalid close time in kline".to_string()))?;

        history.add_candle(Candlestick {
            open_time,
            close_time,
            open: parse_f64(&kline[1], "open")?,
            high: parse_f64(&kline[2], "high")?,
            low: parse_f64(&kline[3], "low")?,
            close: parse_f64(&kline[4], "close")?,
            volume: parse_f64(&kline[5], "volume")?,
        });
    }

    Ok(history)
}

/// Parse the `/api/v3/ticker/24hr` body for a single symbol
pub fn parse_ticker(symbol: &str, body: &str) -> ExchangeResult<Ticker> {
    let v: Value = serde_json::from_str(body).map_err(|e| ExchangeError::Parse(e.to_string()))?;
    Ok(Ticker {
        symbol: symbol.to_string(),
        last_price: parse_f64(&v["lastPrice"], "lastPrice")?,
        volume: parse_f64(&v["volume"], "volume")?,
        timestamp: v["closeTime"].as_i64().unwrap_or_default(),
    })
}

/// Parse the `/api/v3/account` body, dropping empty balances
pub fn parse_balances(body: &str) -> ExchangeResult<Vec<Balance>> {
    let v: Value = serde_json::from_str(body).map_err(|e| ExchangeError::Parse(e.to_string()))?;
    let entries = v["balances"]
        .as_array()
        .ok_or_else(|| ExchangeError::Parse("Missing balances".to_string()))?;

    let mut balances = Vec::new();
    for entry in entries {
        let asset = entry["asset"]
            .as_str()
            .ok_or_else(|| ExchangeError::Parse("Missing asset".to_string()))?;
        let balance = Balance::new(
            asset,
            parse_f64(&entry["free"], "free")?,
            parse_f64(&entry["locked"], "locked")?,
        );
        if balance.total > 0.0 {
            balances.push(balance);
        }
    }
    Ok(balances)
}

/// Parse the `/api/v3/exchangeInfo` body for one symbol
pub fn parse_symbol_rules(symbol: &str, body: &str) -> ExchangeResult<SymbolRules> {
    let v: Value = serde_json::from_str(body).map_err(|e| ExchangeError::Parse(e.to_string()))?;
    let info = v["symbols"]
        .as_array()
        .and_then(|symbols| symbols.iter().find(|s| s["symbol"] == symbol))
        .ok_or_else(|| ExchangeError::InvalidSymbol(symbol.to_string()))?;

    let asset = |field: &str| {
        info[field]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExchangeError::Parse(format!("Missing {}", field)))
    };

    let quantity_step = match info["filters"]
        .as_array()
        .and_then(|filters| filters.iter().find(|f| f["filterType"] == "LOT_SIZE"))
    {
        Some(filter) => {
            let step = parse_decimal(&filter["stepSize"], "stepSize")?.normalize();
            (step > Decimal::ZERO).then_some(step)
        }
        None => None,
    };

    Ok(SymbolRules {
        symbol: symbol.to_string(),
        base_asset: asset("baseAsset")?,
        quote_asset: asset("quoteAsset")?,
        quantity_step,
    })
}

/// Parse a new-order response into a fill.
///
/// The average price is the executed quote amount over the executed quantity.
/// Commissions charged in `base_asset` are taken off the filled quantity so
/// it matches what the account actually holds.
pub fn parse_fill(body: &str, base_asset: Option<&str>) -> ExchangeResult<Fill> {
    let v: Value = serde_json::from_str(body).map_err(|e| ExchangeError::Parse(e.to_string()))?;

    let order_id = match &v["orderId"] {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return Err(ExchangeError::Parse("Missing orderId".to_string())),
    };
    let executed = parse_decimal(&v["executedQty"], "executedQty")?;
    let quote = parse_decimal(&v["cummulativeQuoteQty"], "cummulativeQuoteQty")?;

    let average = if executed > Decimal::ZERO {
        quote / executed
    } else {
        Decimal::ZERO
    };

    let mut base_fees = Decimal::ZERO;
    if let (Some(base), Some(fills)) = (base_asset, v["fills"].as_array()) {
        for fill in fills.iter().filter(|f| f["commissionAsset"] == base) {
            base_fees += parse_decimal(&fill["commission"], "commission")?;
        }
    }
    let net = (executed - base_fees).max(Decimal::ZERO);

    Ok(Fill {
        order_id,
        filled_quantity: net.to_f64().unwrap_or_default(),
        average_fill_price: average.to_f64().unwrap_or_default(),
        timestamp: v["transactTime"].as_i64().unwrap_or_default(),
    })
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<PriceHistory> {
        let request = market::klines(symbol, kline_interval(interval)?).limit(limit);
        let body = self.send(request).await?;
        parse_klines(symbol, interval, &body)
    }

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let body = self
            .send(market::ticker_twenty_four_hr().symbol(symbol))
            .await?;
        parse_ticker(symbol, &body)
    }

    async fn fetch_balance(&self) -> ExchangeResult<Vec<Balance>> {
        let body = self.send(trade::account()).await?;
        parse_balances(&body)
    }

    async fn fetch_symbol_rules(&self, symbol: &str) -> ExchangeResult<Option<SymbolRules>> {
        let body = self.send(market::exchange_info().symbol(symbol)).await?;
        let rules = parse_symbol_rules(symbol, &body)?;
        self.rules
            .write()
            .await
            .insert(symbol.to_string(), rules.clone());
        Ok(Some(rules))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> ExchangeResult<Fill> {
        let base_asset = self.base_asset(symbol).await;
        let side = match side {
            OrderSide::Buy => Side::Buy,
            OrderSide::Sell => Side::Sell,
        };

        let request = trade::new_order(symbol, side, "MARKET")
            .quantity(quantity)
            .new_order_resp_type(NewOrderResponseType::Full);
        let body = self.send(request).await.map_err(order_error)?;
        log::debug!("Order result: {}", body);
        parse_fill(&body, base_asset.as_deref())
    }
}
