// src/main.rs
use ai_trade::config::Config;
use ai_trade::domain::errors::{AppError, AppResult, ExchangeError};
use ai_trade::exchange::binance::BinanceClient;
use ai_trade::exchange::client::ExchangeClient;
use ai_trade::status::server;
use ai_trade::status::{HttpStatusPublisher, NoopStatusPublisher, StatusBoard, StatusPublisher};
use ai_trade::trading::TradingBot;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    config.init_logging()?;

    log::info!("Starting ai_trade v{}", env!("CARGO_PKG_VERSION"));
    log::info!(
        "Using {} exchange{}",
        config.exchange.name,
        if config.exchange.testnet { " (testnet)" } else { "" }
    );

    let exchange = create_exchange_client(&config)?;

    // A rejected key is fatal; anything else is retried by the loop
    log::info!("Checking account access...");
    match exchange.fetch_balance().await {
        Ok(balances) => log::info!("Account reachable, {} non-empty balances", balances.len()),
        Err(e @ ExchangeError::Authentication(_)) => return Err(AppError::from(e)),
        Err(e) => log::warn!("Account check failed, continuing: {}", e),
    }

    let (stop_server, server_stopped) = oneshot::channel::<()>();
    let publisher: Arc<dyn StatusPublisher> = if config.status.serve {
        let addr: SocketAddr = config.status.bind_addr.parse().map_err(|e| {
            AppError::Config(format!("Invalid STATUS_BIND_ADDR {}: {}", config.status.bind_addr, e))
        })?;
        let board = if config.ledger.enabled {
            StatusBoard::new().with_ledger(&config.ledger.path)
        } else {
            StatusBoard::new()
        };
        let server_board = board.clone();
        tokio::spawn(async move {
            let shutdown = async {
                server_stopped.await.ok();
            };
            if let Err(e) = server::serve(addr, server_board, shutdown).await {
                log::error!("Status board stopped: {}", e);
            }
        });
        Arc::new(board)
    } else if config.status.enabled {
        Arc::new(HttpStatusPublisher::new(&config.status.url, config.status.timeout_ms)?)
    } else {
        Arc::new(NoopStatusPublisher)
    };

    if !config.trading.auto_trading {
        log::info!("Auto-trading is disabled. Decisions will be logged but not executed.");
    }

    let mut bot = TradingBot::new(config, exchange, publisher);
    log::info!("Bot is running. Press Ctrl+C to stop.");
    bot.run().await?;

    stop_server.send(()).ok();
    log::info!("Shutdown complete. Goodbye!");
    Ok(())
}

/// Create exchange client based on configuration
fn create_exchange_client(config: &Config) -> AppResult<Arc<dyn ExchangeClient>> {
    match config.exchange.name.to_lowercase().as_str() {
        "binance" => Ok(Arc::new(BinanceClient::new(
            &config.exchange.api_key,
            &config.exchange.api_secret,
            config.exchange.testnet,
            config.exchange.request_timeout_secs,
        ))),
        _ => Err(AppError::Config(format!(
            "Unsupported exchange: {}",
            config.exchange.name
        ))),
    }
}
