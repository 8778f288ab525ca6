pub mod bollinger;
pub mod ma;
pub mod macd;
pub mod rsi;

use crate::model::Candle;

/// A technical analysis indicator computed over a slice of candles.
///
/// Candles must be in ascending chronological order (oldest first). The
/// output is aligned 1:1 by index with the input: `series(c).len() ==
/// c.len()` always, with `None` for every index inside the indicator's
/// warm-up. Insufficient data is not an error; it yields an all-`None`
/// series of the input length.
pub trait Indicator: Send {
    /// Unique name of this indicator (e.g., "rsi", "sma").
    #[allow(dead_code)]
    fn name(&self) -> &str;

    /// Minimum number of candles required to produce at least one value.
    fn warmup(&self) -> usize;

    /// Calculate the aligned indicator series.
    fn series(&self, candles: &[Candle]) -> Vec<Option<f64>>;
}

/// Extract close prices from a slice of candles.
pub fn close_prices(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// The most recent computed value of an aligned series, if any.
pub fn latest_value(series: &[Option<f64>]) -> Option<f64> {
    series.iter().rev().find_map(|v| *v)
}

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::{TimeZone, Utc};

    use crate::model::{Candle, TimeFrame};

    pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                symbol: "TEST".into(),
                timeframe: TimeFrame::Min5,
                open_time: Utc.timestamp_opt(i as i64 * 300, 0).unwrap(),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            })
            .collect()
    }
}
