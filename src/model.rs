use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candle timeframe supported by the application.
///
/// String representations match the config file format and the feed's
/// interval query parameter (e.g. `"5m"`, `"1h"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour12,
    Day1,
    Day3,
    Week1,
    Month1,
}

impl TimeFrame {
    /// Parse a config-format string into a `TimeFrame`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "5m" => Some(Self::Min5),
            "15m" => Some(Self::Min15),
            "30m" => Some(Self::Min30),
            "1h" => Some(Self::Hour1),
            "2h" => Some(Self::Hour2),
            "4h" => Some(Self::Hour4),
            "6h" => Some(Self::Hour6),
            "12h" => Some(Self::Hour12),
            "1d" => Some(Self::Day1),
            "3d" => Some(Self::Day3),
            "1w" => Some(Self::Week1),
            "1M" => Some(Self::Month1),
            _ => None,
        }
    }

    /// Return the config-format string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour2 => "2h",
            Self::Hour4 => "4h",
            Self::Hour6 => "6h",
            Self::Hour12 => "12h",
            Self::Day1 => "1d",
            Self::Day3 => "3d",
            Self::Week1 => "1w",
            Self::Month1 => "1M",
        }
    }

    /// Return the kline interval string used by the feed endpoints.
    pub fn feed_interval(self) -> &'static str {
        // Feed intervals happen to share the config spelling
        self.as_str()
    }

    /// Approximate bucket length, used to rank timeframes when validating a
    /// higher-timeframe selection against the chart interval.
    pub fn approx_minutes(self) -> u64 {
        match self {
            Self::Min5 => 5,
            Self::Min15 => 15,
            Self::Min30 => 30,
            Self::Hour1 => 60,
            Self::Hour2 => 120,
            Self::Hour4 => 240,
            Self::Hour6 => 360,
            Self::Hour12 => 720,
            Self::Day1 => 1_440,
            Self::Day3 => 4_320,
            Self::Week1 => 10_080,
            Self::Month1 => 43_200,
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One streaming update: a candle plus whether its bucket is closed.
///
/// An open bucket revises the window's last candle in place; a closed bucket
/// is final and the next update starts a new bucket.
#[derive(Debug, Clone)]
pub struct CandleUpdate {
    pub candle: Candle,
    pub closed: bool,
}

/// Outcome of applying a streamed candle to a `CandleWindow`.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    /// Same bucket time as the retained last candle: revised in place.
    ReplacedLast,
    /// Strictly newer bucket: appended, evicting the oldest at capacity.
    Appended { evicted: Option<Candle> },
    /// Older than the retained last candle: dropped.
    Ignored,
}

/// Ordered, fixed-capacity sliding window of candles.
///
/// Invariants: `open_time` strictly increasing, `len() <= capacity`.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    capacity: usize,
    candles: Vec<Candle>,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            candles: Vec::with_capacity(capacity),
        }
    }

    /// Seed a window from historical candles, keeping the newest `capacity`.
    ///
    /// Input must be in ascending chronological order; duplicate or
    /// out-of-order rows are dropped.
    pub fn from_history(capacity: usize, history: Vec<Candle>) -> Self {
        let mut window = Self::new(capacity);
        for candle in history {
            window.apply(candle);
        }
        window
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Apply one inbound candle, preserving the window invariants.
    pub fn apply(&mut self, candle: Candle) -> WindowEvent {
        if let Some(last) = self.candles.last_mut() {
            if candle.open_time == last.open_time {
                *last = candle;
                return WindowEvent::ReplacedLast;
            }
            if candle.open_time < last.open_time {
                return WindowEvent::Ignored;
            }
        }

        let evicted = if self.candles.len() >= self.capacity.max(1) {
            Some(self.candles.remove(0))
        } else {
            None
        };
        self.candles.push(candle);
        WindowEvent::Appended { evicted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle_at(minute: i64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            timeframe: TimeFrame::Min5,
            open_time: Utc.timestamp_opt(minute * 60, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn timeframe_round_trip() {
        let frames = [
            ("5m", TimeFrame::Min5),
            ("15m", TimeFrame::Min15),
            ("30m", TimeFrame::Min30),
            ("1h", TimeFrame::Hour1),
            ("2h", TimeFrame::Hour2),
            ("4h", TimeFrame::Hour4),
            ("6h", TimeFrame::Hour6),
            ("12h", TimeFrame::Hour12),
            ("1d", TimeFrame::Day1),
            ("3d", TimeFrame::Day3),
            ("1w", TimeFrame::Week1),
            ("1M", TimeFrame::Month1),
        ];
        for (s, tf) in frames {
            assert_eq!(TimeFrame::from_str(s), Some(tf));
            assert_eq!(tf.as_str(), s);
        }
    }

    #[test]
    fn timeframe_invalid_string_returns_none() {
        assert_eq!(TimeFrame::from_str("2m"), None);
        assert_eq!(TimeFrame::from_str(""), None);
        assert_eq!(TimeFrame::from_str("1mo"), None);
    }

    #[test]
    fn timeframe_serde_round_trip() {
        let json = serde_json::to_string(&TimeFrame::Hour4).unwrap();
        let parsed: TimeFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TimeFrame::Hour4);
    }

    #[test]
    fn timeframe_ordering_by_minutes() {
        assert!(TimeFrame::Day1.approx_minutes() > TimeFrame::Hour4.approx_minutes());
        assert!(TimeFrame::Month1.approx_minutes() > TimeFrame::Week1.approx_minutes());
    }

    #[test]
    fn window_appends_until_capacity() {
        let mut window = CandleWindow::new(3);
        for i in 0..3 {
            let event = window.apply(candle_at(i, 100.0 + i as f64));
            assert_eq!(event, WindowEvent::Appended { evicted: None });
        }
        assert_eq!(window.candles().len(), 3);
    }

    #[test]
    fn window_evicts_oldest_at_capacity() {
        let mut window = CandleWindow::new(3);
        for i in 0..3 {
            window.apply(candle_at(i, 100.0));
        }
        let event = window.apply(candle_at(3, 104.0));
        match event {
            WindowEvent::Appended { evicted: Some(old) } => {
                assert_eq!(old.open_time, Utc.timestamp_opt(0, 0).unwrap());
            }
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(window.candles().len(), 3);
        assert_eq!(window.candles()[0].open_time, Utc.timestamp_opt(60, 0).unwrap());
        assert_eq!(window.candles().last().unwrap().close, 104.0);
    }

    #[test]
    fn window_same_time_replaces_in_place() {
        let mut window = CandleWindow::new(3);
        window.apply(candle_at(0, 100.0));
        window.apply(candle_at(1, 101.0));
        let event = window.apply(candle_at(1, 150.0));
        assert_eq!(event, WindowEvent::ReplacedLast);
        assert_eq!(window.candles().len(), 2);
        assert_eq!(window.candles().last().unwrap().close, 150.0);
    }

    #[test]
    fn window_drops_stale_candle() {
        let mut window = CandleWindow::new(3);
        window.apply(candle_at(5, 100.0));
        let event = window.apply(candle_at(2, 90.0));
        assert_eq!(event, WindowEvent::Ignored);
        assert_eq!(window.candles().len(), 1);
        assert_eq!(window.candles().last().unwrap().close, 100.0);
    }

    #[test]
    fn from_history_keeps_newest_capacity() {
        let history: Vec<Candle> = (0..10).map(|i| candle_at(i, i as f64)).collect();
        let window = CandleWindow::from_history(4, history);
        assert_eq!(window.candles().len(), 4);
        assert_eq!(window.candles()[0].close, 6.0);
        assert_eq!(window.candles().last().unwrap().close, 9.0);
    }
}
