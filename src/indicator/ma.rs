use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::{Indicator, close_prices};
use crate::model::Candle;

/// Simple Moving Average.
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    /// Aligned SMA over a raw price slice.
    ///
    /// `None` for indices before `period - 1`; all `None` when the slice is
    /// shorter than the period.
    pub fn series_from_prices(&self, prices: &[f64]) -> Vec<Option<f64>> {
        let mut series = vec![None; prices.len()];
        if prices.len() < self.period {
            return series;
        }
        for (offset, window) in prices.windows(self.period).enumerate() {
            let mean = window.iter().sum::<f64>() / self.period as f64;
            series[offset + self.period - 1] = Some(mean);
        }
        series
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        "sma"
    }

    fn warmup(&self) -> usize {
        self.period
    }

    fn series(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        self.series_from_prices(&close_prices(candles))
    }
}

/// EMA seeded with the first sample rather than an averaged warm-up.
///
/// This matches the reference charting behavior that MACD parity depends on;
/// every index gets a value, so alignment is handled by the caller.
pub(crate) fn chart_ema(prices: &[f64], period: usize) -> Vec<f64> {
    let mut ema = Vec::with_capacity(prices.len());
    let Some(&first) = prices.first() else {
        return ema;
    };
    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = first;
    ema.push(first);
    for &price in &prices[1..] {
        prev = price * k + prev * (1.0 - k);
        ema.push(prev);
    }
    ema
}
