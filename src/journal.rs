//! Trade journal: append-only JSON-lines log of executed events plus a
//! small daily summary for the operator channel.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::regime::Regime;
use crate::types::Side;

/// Kind of executed event being journaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Entry,
    Add,
    PartialTakeProfit,
    Exit,
}

/// One journaled trade event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub event: EventKind,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub score: f64,
    pub regime: Regime,
    pub pnl: Option<f64>,
}

/// Aggregates over today's records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailySummary {
    pub trades: usize,
    pub avg_score: f64,
    pub total_pnl: f64,
}

/// Append-only journal backed by one JSON object per line.
pub struct TradeJournal {
    path: PathBuf,
}

impl TradeJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append a record. Best effort: a journal failure is logged and never
    /// interferes with trading.
    pub fn append(&self, record: &TradeRecord) {
        if let Err(e) = self.try_append(record) {
            warn!("Journal append failed: {e}");
        }
    }

    fn try_append(&self, record: &TradeRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Count, mean score and summed PnL over today's (UTC) records.
    /// Unparsable lines are skipped.
    pub fn daily_summary(&self) -> DailySummary {
        self.daily_summary_at(Utc::now())
    }

    fn daily_summary_at(&self, now: DateTime<Utc>) -> DailySummary {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return DailySummary::default();
        };
        let today = now.date_naive();
        let mut summary = DailySummary::default();
        let mut score_sum = 0.0;
        for line in raw.lines() {
            let Ok(record) = serde_json::from_str::<TradeRecord>(line) else {
                continue;
            };
            if record.ts.date_naive() != today {
                continue;
            }
            summary.trades += 1;
            score_sum += record.score;
            summary.total_pnl += record.pnl.unwrap_or(0.0);
        }
        if summary.trades > 0 {
            summary.avg_score = score_sum / summary.trades as f64;
        }
        summary
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
