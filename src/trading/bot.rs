// src/trading/bot.rs
use crate::analysis::indicators::calculate_indicators;
use crate::analysis::regime::{calculate_signal_strength, detect_market_regime};
use crate::config::{Config, SymbolConfig};
use crate::domain::errors::{AnalysisError, AppResult, ExchangeError};
use crate::domain::models::{OrderSide, SymbolRules, TradeAction, TradingDecision};
use crate::exchange::client::ExchangeClient;
use crate::ledger::{LedgerRecord, TradeLedger};
use crate::status::StatusPublisher;
use crate::trading::decision::DecisionScorer;
use crate::trading::execution::{RetryPolicy, TradeExecutor};
use crate::trading::risk::{ExitReason, PositionManager};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

const RECENT_DECISIONS: usize = 50;
const REPORTED_DECISIONS: usize = 10;

/// Owns all trading state and drives the polling loop
pub struct TradingBot {
    config: Config,
    exchange: Arc<dyn ExchangeClient>,
    executor: TradeExecutor,
    scorer: DecisionScorer,
    positions: PositionManager,
    publisher: Arc<dyn StatusPublisher>,
    ledger: Option<TradeLedger>,
    recent_decisions: VecDeque<TradingDecision>,
    /// Spendable quote balance from the last balance fetch
    free_quote: Option<f64>,
}

impl TradingBot {
    pub fn new(
        config: Config,
        exchange: Arc<dyn ExchangeClient>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        let executor = TradeExecutor::new(
            exchange.clone(),
            RetryPolicy::from_config(&config.execution),
            config.execution.quantity_step,
        );
        let ledger = if config.ledger.enabled {
            Some(TradeLedger::new(&config.ledger.path))
        } else {
            None
        };

        Self {
            scorer: DecisionScorer::new(config.decision.clone()),
            positions: PositionManager::new(config.risk.clone()),
            executor,
            exchange,
            publisher,
            ledger,
            recent_decisions: VecDeque::with_capacity(RECENT_DECISIONS),
            free_quote: None,
            config,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.executor = TradeExecutor::new(
            self.exchange.clone(),
            retry,
            self.config.execution.quantity_step,
        );
        self
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut PositionManager {
        &mut self.positions
    }

    pub fn recent_decisions(&self) -> &VecDeque<TradingDecision> {
        &self.recent_decisions
    }

    fn enabled_symbols(&self) -> Vec<SymbolConfig> {
        self.config
            .trading
            .symbols
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    /// Resolve each pair's lot step: configured override, then the
    /// exchange's lot filter, then the default step.
    pub async fn load_quantity_steps(&mut self) {
        for symbol_config in self.enabled_symbols() {
            let symbol = symbol_config.symbol.as_str();
            if let Some(step) = symbol_config.quantity_step {
                self.executor.set_quantity_step(symbol, step);
                continue;
            }
            match self.exchange.fetch_symbol_rules(symbol).await {
                Ok(Some(SymbolRules {
                    quantity_step: Some(step),
                    ..
                })) => {
                    log::info!("{} lot step {}", symbol, step);
                    self.executor.set_quantity_step(symbol, step);
                }
                Ok(_) => log::debug!("{} has no lot filter, using default step", symbol),
                Err(e) => log_exchange_error(&format!("Lot rules unavailable for {}", symbol), &e),
            }
        }
    }

    /// Run until Ctrl-C (or SIGTERM on unix)
    pub async fn run(&mut self) -> AppResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run both timers until `shutdown` resolves; a tick in progress always
    /// completes first.
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) -> AppResult<()> {
        let total_coins = self.enabled_symbols().len();
        log::info!(
            "Trading {} symbols on {} candles (auto trading: {})",
            total_coins,
            self.config.trading.interval,
            self.config.trading.auto_trading
        );
        self.load_quantity_steps().await;
        self.publisher
            .publish(json!({
                "status": "running",
                "mode": self.mode(),
                "total_coins": total_coins,
            }))
            .await;

        let mut analysis = interval(Duration::from_secs(self.config.trading.analysis_interval_secs));
        analysis.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut price_check =
            interval(Duration::from_secs(self.config.trading.price_check_interval_secs));
        price_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    log::info!("Shutdown requested");
                    break;
                }
                _ = analysis.tick() => self.run_analysis_tick().await,
                _ = price_check.tick() => self.run_price_check_tick().await,
            }
        }

        self.publisher.publish(json!({"status": "stopped"})).await;
        log::info!("Trading loop stopped");
        Ok(())
    }

    fn mode(&self) -> &'static str {
        if self.config.trading.auto_trading {
            "live"
        } else {
            "dry_run"
        }
    }

    /// Exits for every open position, then entries for every symbol
    pub async fn run_analysis_tick(&mut self) {
        let marks = self.mark_positions().await;
        self.refresh_equity().await;
        let exited = self.check_exits(marks).await;

        for symbol_config in &self.enabled_symbols() {
            let Some(decision) = self.analyze_symbol(symbol_config).await else {
                continue;
            };
            if exited.contains(&decision.symbol) {
                log::info!("{} exited this tick, skipping {}", decision.symbol, decision.action);
                continue;
            }
            self.act_on_decision(&decision).await;
        }

        self.publisher.publish(self.status_update()).await;
    }

    /// Exits only
    pub async fn run_price_check_tick(&mut self) {
        let marks = self.mark_positions().await;
        let exited = self.check_exits(marks).await;
        if !exited.is_empty() {
            self.publisher.publish(self.status_update()).await;
        }
    }

    async fn refresh_equity(&mut self) {
        let today = Utc::now().date_naive();
        match self.exchange.fetch_balance().await {
            Ok(balances) => {
                let quote_asset = &self.config.trading.quote_asset;
                let equity = self.positions.equity_from_balances(&balances, quote_asset);
                self.free_quote = Some(
                    balances
                        .iter()
                        .filter(|b| &b.asset == quote_asset)
                        .map(|b| b.free)
                        .sum(),
                );
                self.positions.record_equity(Some(equity), today);
            }
            Err(e) => {
                log_exchange_error("Balance fetch failed, equity unknown", &e);
                self.free_quote = None;
                self.positions.record_equity(None, today);
            }
        }
    }

    /// Fetch a fresh price for every open position and mark it
    async fn mark_positions(&mut self) -> Vec<(String, f64)> {
        let symbols: Vec<String> = self.positions.positions().keys().cloned().collect();
        let mut marks = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            match self.exchange.fetch_ticker(&symbol).await {
                Ok(ticker) => {
                    self.positions.mark_price(&symbol, ticker.last_price);
                    marks.push((symbol, ticker.last_price));
                }
                Err(e) => log_exchange_error(&format!("Ticker fetch failed for {}", symbol), &e),
            }
        }
        marks
    }

    async fn check_exits(&mut self, marks: Vec<(String, f64)>) -> HashSet<String> {
        let mut exited = HashSet::new();

        for (symbol, price) in marks {
            if let Some(reason) = self.positions.evaluate_exit(&symbol, price) {
                log::info!("{} exit triggered at {:.4}: {}", symbol, price, reason);
                if self.close_position(&symbol, reason).await {
                    exited.insert(symbol);
                }
            }
        }

        exited
    }

    async fn analyze_symbol(&mut self, symbol_config: &SymbolConfig) -> Option<TradingDecision> {
        let symbol = symbol_config.symbol.as_str();
        let history = match self
            .exchange
            .fetch_ohlcv(symbol, &self.config.trading.interval, self.config.trading.candle_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                log_exchange_error(&format!("Candle fetch failed for {}", symbol), &e);
                return None;
            }
        };

        let series = match calculate_indicators(&history) {
            Ok(series) => series,
            Err(e @ AnalysisError::InsufficientData { .. }) => {
                log::info!("{}: {}", symbol, e);
                return None;
            }
            Err(e) => {
                log::warn!("{}: {}", symbol, e);
                return None;
            }
        };

        let price = match self.exchange.fetch_ticker(symbol).await {
            Ok(ticker) => ticker.last_price,
            Err(e) => {
                log_exchange_error(&format!("Ticker fetch failed for {}", symbol), &e);
                return None;
            }
        };

        let regime = detect_market_regime(&series);
        let strength = calculate_signal_strength(&series);
        let decision = match self.scorer.decide(
            &series,
            regime,
            strength,
            price,
            self.positions.equity().unwrap_or(0.0),
            symbol_config.allocation,
            Utc::now().timestamp_millis(),
        ) {
            Ok(decision) => decision,
            Err(e) => {
                log::warn!("{}: {}", symbol, e);
                return None;
            }
        };

        log::info!(
            "{} {} (confidence {:.2}, regime {}, strength {}): {}",
            decision.symbol,
            decision.action,
            decision.confidence,
            decision.market_regime,
            decision.signal_strength,
            decision.reasoning
        );
        self.remember(decision.clone());
        Some(decision)
    }

    fn remember(&mut self, decision: TradingDecision) {
        if self.recent_decisions.len() == RECENT_DECISIONS {
            self.recent_decisions.pop_front();
        }
        self.recent_decisions.push_back(decision);
    }

    async fn act_on_decision(&mut self, decision: &TradingDecision) {
        if decision.action == TradeAction::Hold {
            return;
        }
        if !self.config.trading.auto_trading {
            log::info!("Dry run: not acting on {} {}", decision.action, decision.symbol);
            return;
        }

        match decision.action {
            TradeAction::Buy => self.enter(decision).await,
            TradeAction::Sell => {
                // spot only: a sell signal can only close an existing long
                if self.positions.has_position(&decision.symbol) {
                    self.close_position(&decision.symbol, ExitReason::Signal).await;
                }
            }
            TradeAction::Hold => {}
        }
    }

    async fn enter(&mut self, decision: &TradingDecision) {
        let symbol = decision.symbol.as_str();
        if !self.positions.can_open_new_position(symbol) {
            return;
        }
        let spendable = self.free_quote.unwrap_or(0.0);
        let size_usd = decision.position_size_usd.min(spendable);
        if size_usd < decision.position_size_usd {
            log::info!(
                "{} entry capped at free {} balance {:.2}",
                symbol,
                self.config.trading.quote_asset,
                spendable
            );
        }
        if size_usd <= 0.0 || decision.price <= 0.0 {
            return;
        }

        let quantity = size_usd / decision.price;
        let fill = match self
            .executor
            .place_market_order(symbol, OrderSide::Buy, quantity)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                log::error!("Entry for {} abandoned: {}", symbol, e);
                return;
            }
        };

        let (profit_target_pct, stop_loss_pct) = self.positions.compute_dynamic_targets(
            decision.confidence,
            decision.volatility,
            decision.market_regime,
            decision.risk_reward_ratio,
        );
        let position = self.positions.open_or_add(
            symbol,
            fill.filled_quantity,
            fill.average_fill_price,
            profit_target_pct,
            stop_loss_pct,
        );

        let record = LedgerRecord {
            timestamp: Utc::now().to_rfc3339(),
            symbol: symbol.to_string(),
            signal: decision.action.to_string(),
            side: OrderSide::Buy.to_string(),
            executed_price: fill.average_fill_price,
            executed_size: fill.filled_quantity,
            stop_loss: Some(position.stop_price),
            take_profit: Some(position.average_entry_price * (1.0 + position.profit_target_pct)),
            order_id: fill.order_id,
            pnl: None,
        };
        self.record(&record);
    }

    /// Sell the whole position; state is untouched if the order fails
    async fn close_position(&mut self, symbol: &str, reason: ExitReason) -> bool {
        let quantity = match self.positions.position(symbol) {
            Some(position) => position.quantity,
            None => return false,
        };

        let fill = match self
            .executor
            .place_market_order(symbol, OrderSide::Sell, quantity)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                log::error!("Exit for {} ({}) failed, keeping position: {}", symbol, reason, e);
                return false;
            }
        };

        let pnl = self
            .positions
            .close(symbol, fill.average_fill_price, reason);

        let record = LedgerRecord {
            timestamp: Utc::now().to_rfc3339(),
            symbol: symbol.to_string(),
            signal: reason.to_string(),
            side: OrderSide::Sell.to_string(),
            executed_price: fill.average_fill_price,
            executed_size: fill.filled_quantity,
            stop_loss: None,
            take_profit: None,
            order_id: fill.order_id,
            pnl,
        };
        self.record(&record);
        true
    }

    fn record(&self, record: &LedgerRecord) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.append(record) {
                log::error!("Failed to write ledger {}: {}", ledger.path().display(), e);
            }
        }
    }

    /// Snapshot pushed to the status board after each analysis tick
    pub fn status_update(&self) -> Value {
        let equity = self.positions.equity();
        let daily_pnl = match (equity, self.positions.daily_start_equity()) {
            (Some(current), Some(start)) => Some(current - start),
            _ => None,
        };
        let positions: Vec<_> = self.positions.positions().values().collect();
        let decisions: Vec<_> = self
            .recent_decisions
            .iter()
            .rev()
            .take(REPORTED_DECISIONS)
            .collect();
        let confidence_level = if decisions.is_empty() {
            0.0
        } else {
            decisions.iter().map(|d| d.confidence).sum::<f64>() / decisions.len() as f64
        };

        json!({
            "status": "running",
            "mode": self.mode(),
            "timestamp": Utc::now().to_rfc3339(),
            "equity": equity,
            "daily_pnl": daily_pnl,
            "total_exposure": self.positions.total_exposure_fraction(),
            "daily_loss_limit_hit": self.positions.check_daily_loss_limit(),
            "open_positions": positions,
            "performance": self.positions.stats().summary(),
            "recent_decisions": decisions,
            "market_regime": decisions.first().map(|d| d.market_regime),
            "confidence_level": confidence_level,
        })
    }
}

fn log_exchange_error(context: &str, error: &ExchangeError) {
    if error.is_transient() {
        log::warn!("{}: {}", context, error);
    } else {
        log::error!("{}: {}", context, error);
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
