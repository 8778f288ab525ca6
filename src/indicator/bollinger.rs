use error_stack::{Report, bail};
use serde::{Deserialize, Serialize};

use crate::error::IndicatorError;
use crate::indicator::ma::Sma;
use crate::indicator::{Indicator, close_prices, latest_value};
use crate::model::Candle;

pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: f64,
    sma: Sma,
}

/// Upper/middle/lower bands, each aligned 1:1 with the input candles.
#[derive(Debug, Clone, Default)]
pub struct BandSeries {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Latest computed point of each band, for snapshot payloads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandValue {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BandSeries {
    fn pending(len: usize) -> Self {
        Self {
            upper: vec![None; len],
            middle: vec![None; len],
            lower: vec![None; len],
        }
    }

    pub fn latest(&self) -> Option<BandValue> {
        Some(BandValue {
            upper: latest_value(&self.upper)?,
            middle: latest_value(&self.middle)?,
            lower: latest_value(&self.lower)?,
        })
    }
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: f64) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        if std_dev_multiplier <= 0.0 {
            bail!(IndicatorError::InvalidParameter {
                name: "std_dev_multiplier must be > 0".into(),
            });
        }
        Ok(Self {
            period,
            std_dev_multiplier,
            sma: Sma::new(period)?,
        })
    }

    /// Calculate all three aligned bands.
    pub fn calculate(&self, candles: &[Candle]) -> BandSeries {
        let prices = close_prices(candles);
        let mut bands = BandSeries::pending(prices.len());
        if prices.len() < self.period {
            return bands;
        }

        bands.middle = self.sma.series_from_prices(&prices);

        for i in (self.period - 1)..prices.len() {
            let Some(middle) = bands.middle[i] else {
                continue;
            };
            // Population standard deviation of the window against its mean
            let window = &prices[i + 1 - self.period..=i];
            let variance = window.iter().map(|&p| (p - middle).powi(2)).sum::<f64>()
                / self.period as f64;
            let std_dev = variance.sqrt();
            bands.upper[i] = Some(middle + self.std_dev_multiplier * std_dev);
            bands.lower[i] = Some(middle - self.std_dev_multiplier * std_dev);
        }

        bands
    }
}

impl Indicator for BollingerBands {
    fn name(&self) -> &str {
        "bollinger"
    }

    fn warmup(&self) -> usize {
        self.period
    }

    /// Middle band (SMA) only; the full set comes from
    /// [`BollingerBands::calculate`].
    fn series(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        self.calculate(candles).middle
    }
}
