pub mod sqlite;

use chrono::{DateTime, Utc};
use error_stack::Report;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisResult, Swot, TradeSignal};
use crate::error::HistoryError;

/// One persisted analysis, append-only and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub owner_id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub analysis_summary: String,
    pub swot: Swot,
    pub trade_signal: TradeSignal,
    /// Chart snapshot data URI captured at analysis time.
    pub chart_image: String,
}

impl HistoryEntry {
    pub fn new(
        owner_id: impl Into<String>,
        symbol: impl Into<String>,
        chart_image: impl Into<String>,
        result: &AnalysisResult,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            timestamp: Utc::now(),
            symbol: symbol.into(),
            analysis_summary: result.analysis.clone(),
            swot: result.swot.clone(),
            trade_signal: result.trade_signal.clone(),
            chart_image: chart_image.into(),
        }
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    /// Cursor for the next page: the timestamp of this page's last entry.
    /// `None` when the page came back short (no further pages).
    pub next_cursor: Option<DateTime<Utc>>,
}

/// Persistence boundary for analysis history.
///
/// Pagination is cursor-based on timestamps (strictly-older-than), so page
/// boundaries stay stable while new analyses are appended concurrently.
pub trait HistoryStore: Send + Sync {
    fn append(&self, entry: &HistoryEntry) -> BoxFuture<'_, Result<(), Report<HistoryError>>>;

    fn page(
        &self,
        owner_id: &str,
        page_size: usize,
        cursor: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, Result<HistoryPage, Report<HistoryError>>>;
}
