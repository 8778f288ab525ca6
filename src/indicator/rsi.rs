use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::{Indicator, close_prices};
use crate::model::Candle;

/// RSI (Relative Strength Index) using Wilder's smoothing method.
pub struct Rsi {
    period: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        "rsi"
    }

    fn warmup(&self) -> usize {
        self.period + 1
    }

    fn series(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        let prices = close_prices(candles);
        let mut series = vec![None; prices.len()];
        if prices.len() < self.warmup() {
            return series;
        }

        let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

        // Seed: simple average of the first `period` gains/losses; the first
        // computable index is `period`
        let mut avg_gain: f64 = deltas[..self.period]
            .iter()
            .map(|&d| d.max(0.0))
            .sum::<f64>()
            / self.period as f64;
        let mut avg_loss: f64 = deltas[..self.period]
            .iter()
            .map(|&d| (-d).max(0.0))
            .sum::<f64>()
            / self.period as f64;

        series[self.period] = Some(rsi_value(avg_gain, avg_loss));

        // Wilder smoothing for subsequent indices
        for (offset, &delta) in deltas[self.period..].iter().enumerate() {
            let gain = delta.max(0.0);
            let loss = (-delta).max(0.0);
            avg_gain = (avg_gain * (self.period - 1) as f64 + gain) / self.period as f64;
            avg_loss = (avg_loss * (self.period - 1) as f64 + loss) / self.period as f64;
            series[self.period + 1 + offset] = Some(rsi_value(avg_gain, avg_loss));
        }

        series
    }
}

/// `avg_loss == 0` means RS is unbounded and RSI is exactly 100, never NaN.
fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::testutil::candles_from_closes;

    #[test]
    fn rsi_period_zero_invalid() {
        assert!(Rsi::new(0).is_err());
    }

    #[test]
    fn rsi_insufficient_data_all_none() {
        let rsi = Rsi::new(14).unwrap();
        let series = rsi.series(&candles_from_closes(&[1.0; 10]));
        assert_eq!(series.len(), 10);
        assert!(series.iter().all(|v| v.is_none()));
    }

    #[test]
    fn rsi_exactly_period_candles_all_none() {
        // The first computable index is `period`, which needs period+1 closes
        let rsi = Rsi::new(14).unwrap();
        let series = rsi.series(&candles_from_closes(&[1.0; 14]));
        assert!(series.iter().all(|v| v.is_none()));
    }

    #[test]
    fn rsi_first_value_at_period_index() {
        let rsi = Rsi::new(3).unwrap();
        let series = rsi.series(&candles_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert_eq!(series.len(), 5);
        assert!(series[..3].iter().all(|v| v.is_none()));
        assert!(series[3].is_some());
        assert!(series[4].is_some());
    }

    #[test]
    fn rsi_monotonic_rise_is_exactly_100() {
        // 20 strictly rising closes with RSI(14): avg_loss stays 0, so every
        // computable index is exactly 100
        let closes: Vec<f64> = (100..120).map(|i| i as f64).collect();
        let rsi = Rsi::new(14).unwrap();
        let series = rsi.series(&candles_from_closes(&closes));
        let computed: Vec<f64> = series.iter().filter_map(|v| *v).collect();
        assert_eq!(computed.len(), 20 - 14);
        for v in computed {
            assert_eq!(v, 100.0);
        }
    }

    #[test]
    fn rsi_monotonic_fall_is_zero() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 - i as f64).collect();
        let rsi = Rsi::new(4).unwrap();
        let series = rsi.series(&candles_from_closes(&closes));
        for v in series.iter().filter_map(|v| *v) {
            assert!((v - 0.0).abs() < 1e-9);
        }
    }

    #[test]
    fn rsi_bounded_in_0_100() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 12.0 + (i as f64 * 0.13).cos() * 4.0)
            .collect();
        let rsi = Rsi::new(14).unwrap();
        let series = rsi.series(&candles_from_closes(&closes));
        for v in series.iter().filter_map(|v| *v) {
            assert!((0.0..=100.0).contains(&v), "rsi out of range: {v}");
        }
    }

    #[test]
    fn rsi_incremental_continuation_matches_full() {
        // Feeding one extra close and recomputing must match continuing the
        // Wilder recurrence from the previous averages
        let mut closes: Vec<f64> =
            (0..40).map(|i| 50.0 + (i as f64 * 0.41).sin() * 6.0).collect();
        let period = 14;
        let rsi = Rsi::new(period).unwrap();
        let before = rsi.series(&candles_from_closes(&closes));

        closes.push(57.3);
        let after = rsi.series(&candles_from_closes(&closes));

        // Every previously computable index is unchanged
        for (b, a) in before.iter().zip(after.iter()) {
            match (b, a) {
                (Some(b), Some(a)) => assert!((b - a).abs() <= 1e-9 * b.abs().max(1.0)),
                (None, None) => {}
                other => panic!("alignment changed: {other:?}"),
            }
        }
        assert!(after.last().unwrap().is_some());
    }
}
