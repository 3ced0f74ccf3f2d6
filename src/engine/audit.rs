//! Audit sinks for trade records

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::types::TradeRecord;
use crate::common::errors::{PortfolioError, Result};

/// Append-only destination for trade records
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &TradeRecord) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| PortfolioError::Internal("audit sink lock poisoned".into()))
}

/// Keeps records in memory; handy for tests and short paper sessions
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<TradeRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything appended so far, oldest first
    pub fn records(&self) -> Vec<TradeRecord> {
        lock(&self.records).map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: &TradeRecord) -> Result<()> {
        lock(&self.records)?.push(record.clone());
        Ok(())
    }
}

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditSink {
    /// Open (or create) the audit file in append mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every record in a JSON-lines audit file
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<TradeRecord>> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, record: &TradeRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = lock(&self.file)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{IntentOrigin, TradeIntent};
    use crate::config::types::ExecutionMode;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn record(asset: &str) -> TradeRecord {
        let intent = TradeIntent::buy_usd(asset, dec!(10), IntentOrigin::Manual, "audit test");
        TradeRecord::unpriced(&intent, ExecutionMode::Paper, Utc::now(), "no price available")
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        sink.append(&record("BTC")).unwrap();
        sink.append(&record("ETH")).unwrap();
        let assets: Vec<_> = sink.records().into_iter().map(|r| r.asset).collect();
        assert_eq!(assets, vec!["BTC", "ETH"]);
    }

    #[test]
    fn test_jsonl_sink_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("trades.jsonl");

        let sink = JsonlAuditSink::open(&path).unwrap();
        sink.append(&record("BTC")).unwrap();
        sink.append(&record("SOL")).unwrap();
        drop(sink);

        // reopening appends rather than truncating
        let sink = JsonlAuditSink::open(&path).unwrap();
        sink.append(&record("ETH")).unwrap();

        let records = JsonlAuditSink::read_all(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].asset, "ETH");
        assert!(!records[0].executed);
    }
}
