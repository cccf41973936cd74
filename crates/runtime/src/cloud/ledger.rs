//! Append-only ledger of cloud spend
//!
//! Entries live in memory for aggregation and are optionally mirrored to a
//! JSONL file so spend survives restarts. Recording only touches memory;
//! a background writer task owns the file.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

/// Ledger persistence errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger IO error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Corrupt ledger entry at {path}:{line}: {reason}")]
    Corrupt {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Ledger writer needs a Tokio runtime: {0}")]
    NoRuntime(String),
}

/// One billed cloud call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-provider share of a day's spend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpend {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

/// Spend aggregated over one calendar day (UTC)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub date: NaiveDate,
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_usd: f64,
    pub by_provider: BTreeMap<String, ProviderSpend>,
}

enum WriterOp {
    Append(CostEntry),
    Flush(oneshot::Sender<()>),
}

pub struct CostLedger {
    entries: Mutex<Vec<CostEntry>>,
    writer: Option<mpsc::UnboundedSender<WriterOp>>,
}

impl CostLedger {
    /// Ledger kept only in memory
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            writer: None,
        }
    }

    /// Ledger mirrored to `sink` as JSONL. Must be called inside a Tokio runtime.
    pub fn with_sink<W>(sink: W) -> Result<Self, LedgerError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn(Vec::new(), sink, "sink".to_string())
    }

    fn spawn<W>(entries: Vec<CostEntry>, sink: W, label: String) -> Result<Self, LedgerError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| LedgerError::NoRuntime(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(write_entries(sink, label, rx));

        Ok(Self {
            entries: Mutex::new(entries),
            writer: Some(tx),
        })
    }

    /// Open a ledger backed by a JSONL file, replaying existing entries.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let entries = if path.exists() {
            read_entries(&path)?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_error(&path, e))?;
            }
            Vec::new()
        };

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;

        tracing::info!(
            "Cost ledger opened at {} with {} entries",
            path.display(),
            entries.len()
        );

        Self::spawn(
            entries,
            tokio::fs::File::from_std(file),
            path.display().to_string(),
        )
    }

    /// Append an entry. Never waits on persistence; write failures are
    /// logged by the writer task.
    pub fn record(&self, entry: CostEntry) {
        if let Some(writer) = &self.writer {
            if writer.send(WriterOp::Append(entry.clone())).is_err() {
                tracing::warn!("Cost ledger writer has stopped; entry kept in memory only");
            }
        }
        self.entries.lock().push(entry);
    }

    /// Wait until every entry recorded so far has been handed to the sink.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else { return };
        let (done, wait) = oneshot::channel();
        if writer.send(WriterOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn entries(&self) -> Vec<CostEntry> {
        self.entries.lock().clone()
    }

    pub fn get_costs_today(&self) -> CostSummary {
        self.costs_for(Utc::now().date_naive())
    }

    /// Aggregate every entry whose UTC timestamp falls on `date`.
    pub fn costs_for(&self, date: NaiveDate) -> CostSummary {
        let entries = self.entries.lock();
        let mut summary = CostSummary {
            date,
            calls: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_usd: 0.0,
            by_provider: BTreeMap::new(),
        };

        for entry in entries.iter().filter(|e| e.timestamp.date_naive() == date) {
            summary.calls += 1;
            summary.prompt_tokens += entry.prompt_tokens as u64;
            summary.completion_tokens += entry.completion_tokens as u64;
            summary.total_usd += entry.cost_usd;

            let spend = summary.by_provider.entry(entry.provider.clone()).or_default();
            spend.calls += 1;
            spend.prompt_tokens += entry.prompt_tokens as u64;
            spend.completion_tokens += entry.completion_tokens as u64;
            spend.cost_usd += entry.cost_usd;
        }

        summary
    }
}

fn io_error(path: &Path, e: std::io::Error) -> LedgerError {
    LedgerError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn read_entries(path: &Path) -> Result<Vec<CostEntry>, LedgerError> {
    let content = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| LedgerError::Corrupt {
                path: path.display().to_string(),
                line: index + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

async fn write_entries<W>(mut sink: W, label: String, mut ops: mpsc::UnboundedReceiver<WriterOp>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(op) = ops.recv().await {
        match op {
            WriterOp::Append(entry) => {
                let mut line = match serde_json::to_string(&entry) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!("Failed to encode cost entry: {}", e);
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = sink.write_all(line.as_bytes()).await {
                    tracing::warn!("Failed to persist cost entry to {}: {}", label, e);
                    continue;
                }
                if let Err(e) = sink.flush().await {
                    tracing::warn!("Failed to flush cost ledger {}: {}", label, e);
                }
            }
            WriterOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Cost ledger writer for {} stopped", label);
}
