// src/ledger.rs
use crate::domain::errors::LedgerResult;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// One executed order. Column order is the CSV header order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub timestamp: String,
    pub symbol: String,
    /// Decision action or exit reason that triggered the order
    pub signal: String,
    pub side: String,
    pub executed_price: f64,
    pub executed_size: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub order_id: String,
    /// Realized P&L, only present on closing orders
    pub pnl: Option<f64>,
}

/// Append-only CSV trade log
pub struct TradeLedger {
    path: PathBuf,
}

impl TradeLedger {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a row, writing the header first if the file is new or empty
    pub fn append(&self, record: &LedgerRecord) -> LedgerResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    /// Every row written so far; a ledger that was never written is empty
    pub fn records(&self) -> LedgerResult<Vec<LedgerRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let records = reader.deserialize().collect::<Result<Vec<LedgerRecord>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(symbol: &str, pnl: Option<f64>) -> LedgerRecord {
        LedgerRecord {
            timestamp: "2024-03-01T12:00:00Z".to_string(),
            symbol: symbol.to_string(),
            signal: "BUY".to_string(),
            side: "BUY".to_string(),
            executed_price: 50000.0,
            executed_size: 0.01,
            stop_loss: Some(49000.0),
            take_profit: Some(52500.0),
            order_id: "12345".to_string(),
            pnl,
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");

        TradeLedger::new(&path).append(&record("BTCUSDT", None)).unwrap();
        // a fresh handle on the same file must not repeat the header
        TradeLedger::new(&path).append(&record("ETHUSDT", Some(-12.5))).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "timestamp,symbol,signal,side,executed_price,executed_size,stop_loss,take_profit,order_id,pnl"
        );
        assert!(lines[1].starts_with("2024-03-01T12:00:00Z,BTCUSDT,BUY,BUY,50000"));
        assert!(lines[1].ends_with(",12345,"));
        assert!(lines[2].ends_with(",-12.5"));
    }

    #[test]
    fn test_rows_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(dir.path().join("trades.csv"));
        for _ in 0..3 {
            ledger.append(&record("SOLUSDT", Some(1.0))).unwrap();
        }

        let mut reader = csv::Reader::from_path(ledger.path()).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][1], "SOLUSDT");
        assert_eq!(&rows[2][9], "1.0");
    }

    #[test]
    fn test_records_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(dir.path().join("trades.csv"));
        assert!(ledger.records().unwrap().is_empty());

        let mut closing = record("ETHUSDT", Some(-12.5));
        closing.stop_loss = None;
        closing.take_profit = None;
        ledger.append(&record("BTCUSDT", None)).unwrap();
        ledger.append(&closing).unwrap();

        let records = ledger.records().unwrap();
        assert_eq!(records, vec![record("BTCUSDT", None), closing]);
    }

    #[test]
    fn test_unwritable_path_is_error() {
        let ledger = TradeLedger::new("/nonexistent/dir/trades.csv");
        assert!(ledger.append(&record("BTCUSDT", None)).is_err());
    }
}
