use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::feed::Feed;
use crate::model::{Candle, CandleUpdate, TimeFrame};

const MAX_CANDLES_PER_REQUEST: usize = 1000;
// Reconnect before the 24-hour auto-disconnect (23 hours)
const WS_RECONNECT_SECS: u64 = 23 * 60 * 60;
const MAX_BACKOFF_SECS: u64 = 60;

pub struct BinanceFeed {
    client: reqwest::Client,
    rest_url: String,
    ws_url: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl BinanceFeed {
    pub fn new(rest_url: String, ws_url: String, requests_per_second: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second.max(1))
            .unwrap_or(nonzero_ext::nonzero!(1u32));
        let quota = Quota::per_second(per_second);
        Self {
            client: reqwest::Client::new(),
            rest_url,
            ws_url,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }
}

impl Feed for BinanceFeed {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<FeedError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            // Wait for the rate limiter before making the request
            self.rate_limiter.until_ready().await;

            let url = format!("{}/api/v3/klines", self.rest_url);
            let interval = timeframe.feed_interval();
            let fetch_limit = limit.min(MAX_CANDLES_PER_REQUEST);

            let limit_str = fetch_limit.to_string();
            let params = [
                ("symbol", symbol.as_str()),
                ("interval", interval),
                ("limit", limit_str.as_str()),
            ];

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .change_context(FeedError::Unavailable)?;

            if !response.status().is_success() {
                return Err(Report::new(FeedError::Unavailable)
                    .attach(format!("HTTP status: {}", response.status())));
            }

            let raw: Vec<KlineRow> = response
                .json()
                .await
                .change_context(FeedError::ResponseParse)?;

            info!(
                symbol = %symbol,
                timeframe = %timeframe,
                fetched = raw.len(),
                "candle history fetch complete"
            );

            let candles = raw
                .into_iter()
                .map(|row| row.into_candle(&symbol, timeframe))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(candles)
        })
    }

    fn subscribe_klines(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        tx: mpsc::Sender<CandleUpdate>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<FeedError>>> {
        let symbol = symbol.to_owned();
        let ws_url = self.ws_url.clone();
        Box::pin(async move {
            let mut backoff = Duration::from_secs(1);

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                match run_kline_ws(&ws_url, &symbol, timeframe, &tx, &cancel).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(error = %e, symbol = %symbol, "kline ws dropped, retrying...");
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
                    }
                }
            }
            Ok(())
        })
    }
}

async fn run_kline_ws(
    ws_url: &str,
    symbol: &str,
    timeframe: TimeFrame,
    tx: &mpsc::Sender<CandleUpdate>,
    cancel: &CancellationToken,
) -> Result<(), Report<FeedError>> {
    let stream_name = format!(
        "{}@kline_{}",
        symbol.to_lowercase(),
        timeframe.feed_interval()
    );
    let url = format!("{ws_url}?streams={stream_name}");

    let (ws_stream, _) = connect_async(&url)
        .await
        .change_context(FeedError::Connection)?;

    let (mut write, mut read) = ws_stream.split();

    info!(symbol = %symbol, timeframe = %timeframe, "kline ws connected");

    // Reconnect after 23h to stay ahead of the server's 24h auto-disconnect
    let reconnect_timer = tokio::time::sleep(Duration::from_secs(WS_RECONNECT_SECS));
    tokio::pin!(reconnect_timer);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(symbol = %symbol, "kline ws cancelled");
                break;
            }
            _ = &mut reconnect_timer => {
                info!("kline ws 23h limit reached, reconnecting");
                return Err(Report::new(FeedError::StreamDropped)
                    .attach("scheduled reconnect"));
            }
            msg = read.next() => {
                match msg {
                    None => {
                        return Err(Report::new(FeedError::StreamDropped)
                            .attach("stream closed by server"));
                    }
                    Some(Err(e)) => {
                        return Err(Report::new(e).change_context(FeedError::StreamDropped));
                    }
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<CombinedMsg<KlineEvent>>(&text) {
                            Ok(combined) => {
                                match combined.data.kline.into_update(symbol, timeframe) {
                                    Ok(update) => {
                                        if tx.send(update).await.is_err() {
                                            // Receiver gone; session was torn down
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!(error = %e, raw = %text, "kline field parse error");
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, raw = %text, "kline message parse error");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        // Server pings every 20s; must pong within 60s
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    Ok(())
}

// ── REST response types ───────────────────────────────────────────────────────

/// Kline row: 12-element array
/// [open_time, open, high, low, close, volume, close_time, ...]
/// Prices are strings and parsed positionally.
#[derive(Debug, Deserialize)]
struct KlineRow(
    i64,                        // 0: open_time (ms)
    String,                     // 1: open
    String,                     // 2: high
    String,                     // 3: low
    String,                     // 4: close
    String,                     // 5: volume
    #[allow(dead_code)] i64,    // 6: close_time
    #[allow(dead_code)] String, // 7: quote asset volume
    #[allow(dead_code)] i64,    // 8: number of trades
    #[allow(dead_code)] String, // 9: taker buy base volume
    #[allow(dead_code)] String, // 10: taker buy quote volume
    #[allow(dead_code)] String, // 11: ignore
);

impl KlineRow {
    fn into_candle(self, symbol: &str, timeframe: TimeFrame) -> Result<Candle, Report<FeedError>> {
        let open_time = DateTime::from_timestamp_millis(self.0).unwrap_or_else(Utc::now);

        Ok(Candle {
            symbol: symbol.to_owned(),
            timeframe,
            open_time,
            open: parse_price(&self.1)?,
            high: parse_price(&self.2)?,
            low: parse_price(&self.3)?,
            close: parse_price(&self.4)?,
            volume: parse_price(&self.5)?,
        })
    }
}

fn parse_price(s: &str) -> Result<f64, Report<FeedError>> {
    s.parse::<f64>().change_context(FeedError::ResponseParse)
}

// ── WebSocket message types ───────────────────────────────────────────────────

/// Combined stream wrapper: `{ "stream": "...", "data": { ... } }`
#[derive(Debug, Deserialize)]
struct CombinedMsg<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "k")]
    kline: KlineData,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    /// Bucket open time (ms epoch)
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    /// Whether this bucket is closed; an open bucket revises the last candle
    #[serde(rename = "x")]
    is_closed: bool,
}

impl KlineData {
    fn into_update(
        self,
        symbol: &str,
        timeframe: TimeFrame,
    ) -> Result<CandleUpdate, Report<FeedError>> {
        let open_time = DateTime::from_timestamp_millis(self.open_time).unwrap_or_else(Utc::now);

        Ok(CandleUpdate {
            candle: Candle {
                symbol: symbol.to_owned(),
                timeframe,
                open_time,
                open: parse_price(&self.open)?,
                high: parse_price(&self.high)?,
                low: parse_price(&self.low)?,
                close: parse_price(&self.close)?,
                volume: parse_price(&self.volume)?,
            },
            closed: self.is_closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_row_parses_into_candle() {
        let row = KlineRow(
            1704067200000,
            "42000.0".into(),
            "43000.0".into(),
            "41500.0".into(),
            "42500.0".into(),
            "100.5".into(),
            1704067259999,
            "0".into(),
            10,
            "0".into(),
            "0".into(),
            "0".into(),
        );
        let candle = row.into_candle("BTCUSDT", TimeFrame::Min5).unwrap();
        assert_eq!(candle.symbol, "BTCUSDT");
        assert_eq!(candle.open, 42000.0);
        assert_eq!(candle.high, 43000.0);
        assert_eq!(candle.low, 41500.0);
        assert_eq!(candle.close, 42500.0);
        assert_eq!(candle.volume, 100.5);
    }

    #[test]
    fn kline_row_rejects_malformed_price() {
        let row = KlineRow(
            1704067200000,
            "not-a-number".into(),
            "1".into(),
            "1".into(),
            "1".into(),
            "1".into(),
            0,
            "0".into(),
            0,
            "0".into(),
            "0".into(),
            "0".into(),
        );
        assert!(row.into_candle("BTCUSDT", TimeFrame::Min5).is_err());
    }

    #[test]
    fn kline_stream_message_parses_into_update() {
        let text = r#"{
            "stream": "btcusdt@kline_5m",
            "data": {
                "e": "kline",
                "E": 1704067205000,
                "s": "BTCUSDT",
                "k": {
                    "t": 1704067200000,
                    "T": 1704067499999,
                    "s": "BTCUSDT",
                    "i": "5m",
                    "o": "42000.0",
                    "c": "42100.0",
                    "h": "42200.0",
                    "l": "41900.0",
                    "v": "15.25",
                    "x": false
                }
            }
        }"#;
        let parsed: CombinedMsg<KlineEvent> = serde_json::from_str(text).unwrap();
        let update = parsed
            .data
            .kline
            .into_update("BTCUSDT", TimeFrame::Min5)
            .unwrap();
        assert!(!update.closed);
        assert_eq!(update.candle.close, 42100.0);
        assert_eq!(
            update.candle.open_time,
            DateTime::from_timestamp_millis(1704067200000).unwrap()
        );
    }

    #[test]
    fn kline_closed_flag_round_trips() {
        let data = KlineData {
            open_time: 1704067200000,
            open: "1".into(),
            high: "2".into(),
            low: "0.5".into(),
            close: "1.5".into(),
            volume: "10".into(),
            is_closed: true,
        };
        let update = data.into_update("ETHUSDT", TimeFrame::Hour1).unwrap();
        assert!(update.closed);
        assert_eq!(update.candle.timeframe, TimeFrame::Hour1);
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_candles() {
        let feed = BinanceFeed::new(
            "https://api.binance.com".into(),
            "wss://stream.binance.com:9443/stream".into(),
            20,
        );
        let candles = feed
            .fetch_candles("BTCUSDT", TimeFrame::Min5, 10)
            .await
            .unwrap();
        assert!(!candles.is_empty());
        assert!(candles.len() <= 10);
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_subscribe_klines() {
        let feed = BinanceFeed::new(
            "https://api.binance.com".into(),
            "wss://stream.binance.com:9443/stream".into(),
            20,
        );
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            feed.subscribe_klines("BTCUSDT", TimeFrame::Min5, tx, cancel_clone)
                .await
                .unwrap();
        });

        let update = tokio::time::timeout(Duration::from_secs(15), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");

        assert_eq!(update.candle.symbol, "BTCUSDT");
        cancel.cancel();
    }
}
