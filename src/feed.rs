pub mod binance;

use error_stack::Report;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FeedError;
use crate::model::{Candle, CandleUpdate, TimeFrame};

/// Abstraction over a live market-data feed.
///
/// Uses `BoxFuture` (from `futures` crate) instead of `async fn` in trait
/// to keep the trait object-safe (`dyn Feed`).
pub trait Feed: Send + Sync {
    /// Fetch historical candles via REST, oldest first.
    ///
    /// Any transport failure or non-success status surfaces as
    /// `FeedError::Unavailable`; callers degrade gracefully (a chart without
    /// data computes no indicators, it does not crash).
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<FeedError>>>;

    /// Subscribe to the live kline stream for one symbol/interval.
    ///
    /// Sends one `CandleUpdate` per stream message into `tx` until `cancel`
    /// is triggered. Cancellation is idempotent; updates arriving after it
    /// are never delivered.
    fn subscribe_klines(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        tx: mpsc::Sender<CandleUpdate>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<FeedError>>>;
}
