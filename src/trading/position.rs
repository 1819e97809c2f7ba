// src/trading/position.rs
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Open long position for one symbol
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub average_entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub profit_target_pct: f64,
    pub stop_loss_pct: f64,
    pub trailing_stop_active: bool,
    pub trailing_distance: f64,
    pub highest_price_seen: f64,
    pub stop_price: f64,
    pub entry_count: u32,
    pub last_price: f64,
}

impl Position {
    pub fn new(
        symbol: &str,
        quantity: f64,
        price: f64,
        profit_target_pct: f64,
        stop_loss_pct: f64,
        trailing_distance: f64,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity,
            average_entry_price: price,
            entry_time,
            profit_target_pct,
            stop_loss_pct,
            trailing_stop_active: false,
            trailing_distance,
            highest_price_seen: price,
            stop_price: price * (1.0 - stop_loss_pct),
            entry_count: 1,
            last_price: price,
        }
    }

    /// Merge another fill into the position.
    ///
    /// The average price is volume weighted, the profit target widens to the
    /// larger of the two and the stop loss tightens to the smaller.
    pub fn add(&mut self, quantity: f64, price: f64, profit_target_pct: f64, stop_loss_pct: f64) {
        let total_quantity = self.quantity + quantity;
        if total_quantity > 0.0 {
            self.average_entry_price =
                (self.quantity * self.average_entry_price + quantity * price) / total_quantity;
        }
        self.quantity = total_quantity;
        self.profit_target_pct = self.profit_target_pct.max(profit_target_pct);
        self.stop_loss_pct = self.stop_loss_pct.min(stop_loss_pct);
        self.entry_count += 1;
        self.last_price = price;
        self.highest_price_seen = self.highest_price_seen.max(price);

        let base_stop = self.average_entry_price * (1.0 - self.stop_loss_pct);
        self.stop_price = self.stop_price.max(base_stop);
    }

    /// Fractional gain of `price` over the average entry
    pub fn unrealized_pnl_pct(&self, price: f64) -> f64 {
        if self.average_entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.average_entry_price) / self.average_entry_price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.average_entry_price) * self.quantity
    }

    /// Capital committed at entry prices
    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.average_entry_price
    }

    pub fn market_value(&self) -> f64 {
        self.quantity * self.last_price
    }
}

/// Realized trading statistics for the lifetime of the process
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub peak_pnl: f64,
    /// Largest peak-to-trough fall of cumulative realized P&L
    pub max_drawdown: f64,
}

impl PerformanceStats {
    pub fn record_trade(&mut self, pnl: f64) {
        self.total_trades += 1;
        if pnl > 0.0 {
            self.winning_trades += 1;
            self.gross_profit += pnl;
        } else {
            self.losing_trades += 1;
            self.gross_loss += -pnl;
        }

        self.total_pnl += pnl;
        self.peak_pnl = self.peak_pnl.max(self.total_pnl);
        self.max_drawdown = self.max_drawdown.max(self.peak_pnl - self.total_pnl);
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64
    }

    pub fn avg_win(&self) -> f64 {
        if self.winning_trades == 0 {
            return 0.0;
        }
        self.gross_profit / self.winning_trades as f64
    }

    pub fn avg_loss(&self) -> f64 {
        if self.losing_trades == 0 {
            return 0.0;
        }
        self.gross_loss / self.losing_trades as f64
    }

    /// Gross profit over gross loss; infinite when nothing has been lost yet
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss > 0.0 {
            self.gross_profit / self.gross_loss
        } else if self.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> serde_json::Value {
        let profit_factor = self.profit_factor();
        serde_json::json!({
            "total_trades": self.total_trades,
            "winning_trades": self.winning_trades,
            "losing_trades": self.losing_trades,
            "total_pnl": self.total_pnl,
            "max_drawdown": self.max_drawdown,
            "win_rate": self.win_rate(),
            "avg_win": self.avg_win(),
            "avg_loss": self.avg_loss(),
            // JSON has no infinity
            "profit_factor": if profit_factor.is_finite() { Some(profit_factor) } else { None },
        })
    }
}
