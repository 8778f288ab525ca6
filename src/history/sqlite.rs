use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};

use crate::analysis::{Swot, TradeSignal};
use crate::error::HistoryError;
use crate::history::{HistoryEntry, HistoryPage, HistoryStore};

type HistoryRow = (
    String, // id
    String, // owner_id
    String, // timestamp
    String, // symbol
    String, // analysis_summary
    String, // swot (json)
    String, // trade_signal (json)
    String, // chart_image
);

pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<HistoryError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(HistoryError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(HistoryError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(HistoryError::Migration)?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, Report<HistoryError>> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(HistoryError::Migration)?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> Result<Self, Report<HistoryError>> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .change_context(HistoryError::Migration)?;
        // A pooled :memory: database is per-connection; keep a single
        // connection so every query sees the same data
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .change_context(HistoryError::Migration)?;
        Self::migrate(pool).await
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&self, entry: &HistoryEntry) -> BoxFuture<'_, Result<(), Report<HistoryError>>> {
        let entry = entry.clone();
        Box::pin(async move {
            let swot =
                serde_json::to_string(&entry.swot).change_context(HistoryError::Persistence)?;
            let trade_signal = serde_json::to_string(&entry.trade_signal)
                .change_context(HistoryError::Persistence)?;

            sqlx::query(
                "INSERT INTO analysis_history \
                 (id, owner_id, timestamp, symbol, analysis_summary, swot, trade_signal, chart_image) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&entry.id)
            .bind(&entry.owner_id)
            .bind(entry.timestamp.to_rfc3339())
            .bind(&entry.symbol)
            .bind(&entry.analysis_summary)
            .bind(&swot)
            .bind(&trade_signal)
            .bind(&entry.chart_image)
            .execute(&self.pool)
            .await
            .change_context(HistoryError::Persistence)?;
            Ok(())
        })
    }

    fn page(
        &self,
        owner_id: &str,
        page_size: usize,
        cursor: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, Result<HistoryPage, Report<HistoryError>>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            // Cursor is an explicit timestamp, not an offset, so concurrent
            // appends never shift already-issued page boundaries
            let rows: Vec<HistoryRow> = match cursor {
                Some(cursor) => {
                    sqlx::query_as(
                        "SELECT id, owner_id, timestamp, symbol, analysis_summary, \
                         swot, trade_signal, chart_image \
                         FROM analysis_history \
                         WHERE owner_id = ? AND timestamp < ? \
                         ORDER BY timestamp DESC \
                         LIMIT ?",
                    )
                    .bind(&owner_id)
                    .bind(cursor.to_rfc3339())
                    .bind(page_size as i64)
                    .fetch_all(&self.pool)
                    .await
                }
                None => {
                    sqlx::query_as(
                        "SELECT id, owner_id, timestamp, symbol, analysis_summary, \
                         swot, trade_signal, chart_image \
                         FROM analysis_history \
                         WHERE owner_id = ? \
                         ORDER BY timestamp DESC \
                         LIMIT ?",
                    )
                    .bind(&owner_id)
                    .bind(page_size as i64)
                    .fetch_all(&self.pool)
                    .await
                }
            }
            .change_context(HistoryError::Query)?;

            let entries: Vec<HistoryEntry> = rows.into_iter().map(map_row).collect();
            let next_cursor = if entries.len() == page_size {
                entries.last().map(|e| e.timestamp)
            } else {
                None
            };

            Ok(HistoryPage {
                entries,
                next_cursor,
            })
        })
    }
}

fn map_row(row: HistoryRow) -> HistoryEntry {
    let (id, owner_id, timestamp, symbol, analysis_summary, swot, trade_signal, chart_image) = row;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    let swot: Swot = serde_json::from_str(&swot).unwrap_or_default();
    let trade_signal: TradeSignal = serde_json::from_str(&trade_signal).unwrap_or_default();

    HistoryEntry {
        id,
        owner_id,
        timestamp,
        symbol,
        analysis_summary,
        swot,
        trade_signal,
        chart_image,
    }
}
