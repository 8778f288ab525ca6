use error_stack::{Report, bail};
use serde::{Deserialize, Serialize};

use crate::error::IndicatorError;
use crate::indicator::ma::chart_ema;
use crate::indicator::{Indicator, close_prices, latest_value};
use crate::model::Candle;

/// MACD with chart-parity EMA seeding (seed = first close, not an averaged
/// warm-up; see `chart_ema`).
pub struct Macd {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
}

/// All three MACD series, each aligned 1:1 with the input candles.
#[derive(Debug, Clone, Default)]
pub struct MacdSeries {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

/// Latest computed point of each MACD series, for snapshot payloads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

/// Rendering hint only; the histogram's sign carries no other meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramTone {
    Bullish,
    Bearish,
}

pub fn histogram_tone(value: f64) -> HistogramTone {
    if value >= 0.0 {
        HistogramTone::Bullish
    } else {
        HistogramTone::Bearish
    }
}

impl MacdSeries {
    fn pending(len: usize) -> Self {
        Self {
            macd: vec![None; len],
            signal: vec![None; len],
            histogram: vec![None; len],
        }
    }

    pub fn latest(&self) -> Option<MacdValue> {
        Some(MacdValue {
            macd_line: latest_value(&self.macd)?,
            signal_line: latest_value(&self.signal)?,
            histogram: latest_value(&self.histogram)?,
        })
    }
}

impl Macd {
    pub fn new(
        fast_period: usize,
        slow_period: usize,
        signal_period: usize,
    ) -> Result<Self, Report<IndicatorError>> {
        if fast_period == 0 || slow_period == 0 || signal_period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "all periods must be > 0".into(),
            });
        }
        if fast_period >= slow_period {
            bail!(IndicatorError::InvalidParameter {
                name: "fast_period must be < slow_period".into(),
            });
        }
        Ok(Self {
            fast_period,
            slow_period,
            signal_period,
        })
    }

    /// Calculate all three aligned series.
    pub fn calculate(&self, candles: &[Candle]) -> MacdSeries {
        let prices = close_prices(candles);
        if prices.len() < self.slow_period {
            return MacdSeries::pending(prices.len());
        }

        let fast_ema = chart_ema(&prices, self.fast_period);
        let slow_ema = chart_ema(&prices, self.slow_period);

        // MACD line becomes meaningful once the slow EMA has seen a full
        // period of data
        let macd_offset = self.slow_period - 1;
        let mut series = MacdSeries::pending(prices.len());
        let mut macd_values = Vec::with_capacity(prices.len() - macd_offset);
        for i in macd_offset..prices.len() {
            let value = fast_ema[i] - slow_ema[i];
            series.macd[i] = Some(value);
            macd_values.push(value);
        }

        // Signal line: EMA over the macd values only, re-aligned to the
        // calendar with its own warm-up masked, so the first signal point
        // lands at offset slow-1 + signal-1
        let signal_ema = chart_ema(&macd_values, self.signal_period);
        let signal_offset = macd_offset + self.signal_period - 1;
        for i in signal_offset..prices.len() {
            let signal = signal_ema[i - macd_offset];
            series.signal[i] = Some(signal);
            series.histogram[i] = Some(macd_values[i - macd_offset] - signal);
        }

        series
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        "macd"
    }

    fn warmup(&self) -> usize {
        self.slow_period + self.signal_period - 1
    }

    /// MACD line only; the full set comes from [`Macd::calculate`].
    fn series(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        self.calculate(candles).macd
    }
}
