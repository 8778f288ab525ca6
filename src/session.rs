use error_stack::Report;
use serde::{Deserialize, Serialize};

use crate::error::IndicatorError;
use crate::indicator::bollinger::{BandSeries, BandValue, BollingerBands};
use crate::indicator::ma::Sma;
use crate::indicator::macd::{Macd, MacdSeries, MacdValue};
use crate::indicator::rsi::Rsi;
use crate::indicator::{Indicator, latest_value};
use crate::model::{Candle, CandleUpdate, CandleWindow, TimeFrame, WindowEvent};

fn default_true() -> bool {
    true
}

fn default_sma_period() -> usize {
    20
}

fn default_rsi_period() -> usize {
    14
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_bollinger_period() -> usize {
    20
}

fn default_std_dev() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sma_period")]
    pub period: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rsi_period")]
    pub period: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacdConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_macd_fast")]
    pub fast: usize,
    #[serde(default = "default_macd_slow")]
    pub slow: usize,
    #[serde(default = "default_macd_signal")]
    pub signal: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BollingerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bollinger_period")]
    pub period: usize,
    #[serde(default = "default_std_dev")]
    pub std_dev: f64,
}

/// Per-indicator settings for one chart session.
///
/// Defaults match the application's initial state: SMA(20) and RSI(14) on,
/// MACD(12,26,9) and Bollinger(20, 2.0) off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub sma: SmaConfig,
    pub rsi: RsiConfig,
    pub macd: MacdConfig,
    pub bollinger: BollingerConfig,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma: SmaConfig {
                enabled: true,
                period: default_sma_period(),
            },
            rsi: RsiConfig {
                enabled: true,
                period: default_rsi_period(),
            },
            macd: MacdConfig {
                enabled: false,
                fast: default_macd_fast(),
                slow: default_macd_slow(),
                signal: default_macd_signal(),
            },
            bollinger: BollingerConfig {
                enabled: false,
                period: default_bollinger_period(),
                std_dev: default_std_dev(),
            },
        }
    }
}

/// Derived indicator series, absent for disabled indicators.
#[derive(Debug, Clone, Default)]
pub struct DerivedSeries {
    pub sma: Option<Vec<Option<f64>>>,
    pub rsi: Option<Vec<Option<f64>>>,
    pub macd: Option<MacdSeries>,
    pub bollinger: Option<BandSeries>,
}

/// Latest computed value per enabled indicator; the snapshot embedded in an
/// analysis request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub sma: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<MacdValue>,
    pub bollinger: Option<BandValue>,
}

/// Validated indicator instances built from an `IndicatorConfig`.
struct Engines {
    sma: Option<Sma>,
    rsi: Option<Rsi>,
    macd: Option<Macd>,
    bollinger: Option<BollingerBands>,
}

impl Engines {
    fn build(config: &IndicatorConfig) -> Result<Self, Report<IndicatorError>> {
        Ok(Self {
            sma: config
                .sma
                .enabled
                .then(|| Sma::new(config.sma.period))
                .transpose()?,
            rsi: config
                .rsi
                .enabled
                .then(|| Rsi::new(config.rsi.period))
                .transpose()?,
            macd: config
                .macd
                .enabled
                .then(|| Macd::new(config.macd.fast, config.macd.slow, config.macd.signal))
                .transpose()?,
            bollinger: config
                .bollinger
                .enabled
                .then(|| BollingerBands::new(config.bollinger.period, config.bollinger.std_dev))
                .transpose()?,
        })
    }
}

/// One live chart: the candle window plus every derived indicator series for
/// a single (symbol, interval) selection.
///
/// Created on selection, fed by the stream, dropped on selection change. All
/// mutation goes through `apply`/`set_config`, which recompute the enabled
/// series before returning, so candles and indicators can never be observed
/// out of alignment.
pub struct ChartSession {
    symbol: String,
    timeframe: TimeFrame,
    window: CandleWindow,
    config: IndicatorConfig,
    engines: Engines,
    series: DerivedSeries,
}

impl ChartSession {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: TimeFrame,
        capacity: usize,
        config: IndicatorConfig,
        history: Vec<Candle>,
    ) -> Result<Self, Report<IndicatorError>> {
        let engines = Engines::build(&config)?;
        let mut session = Self {
            symbol: symbol.into(),
            timeframe,
            window: CandleWindow::from_history(capacity, history),
            config,
            engines,
            series: DerivedSeries::default(),
        };
        session.recompute();
        Ok(session)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        self.window.candles()
    }

    pub fn series(&self) -> &DerivedSeries {
        &self.series
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Apply one streamed update: mutate the window, then re-derive every
    /// enabled indicator over the full retained window.
    pub fn apply(&mut self, update: CandleUpdate) -> WindowEvent {
        let event = self.window.apply(update.candle);
        if event != WindowEvent::Ignored {
            self.recompute();
        }
        event
    }

    /// Replace the indicator configuration and re-derive all series from
    /// scratch; nothing survives from the previous configuration.
    pub fn set_config(&mut self, config: IndicatorConfig) -> Result<(), Report<IndicatorError>> {
        self.engines = Engines::build(&config)?;
        self.config = config;
        self.series = DerivedSeries::default();
        self.recompute();
        Ok(())
    }

    /// Latest computed value per enabled indicator.
    pub fn latest_values(&self) -> IndicatorSnapshot {
        IndicatorSnapshot {
            sma: self.series.sma.as_deref().and_then(latest_value),
            rsi: self.series.rsi.as_deref().and_then(latest_value),
            macd: self.series.macd.as_ref().and_then(MacdSeries::latest),
            bollinger: self.series.bollinger.as_ref().and_then(BandSeries::latest),
        }
    }

    /// Full recompute of every enabled indicator; disabled indicators stay
    /// absent. The window is small and bounded, so this runs on every tick.
    fn recompute(&mut self) {
        let candles = self.window.candles();
        self.series = DerivedSeries {
            sma: self.engines.sma.as_ref().map(|sma| sma.series(candles)),
            rsi: self.engines.rsi.as_ref().map(|rsi| rsi.series(candles)),
            macd: self.engines.macd.as_ref().map(|macd| macd.calculate(candles)),
            bollinger: self
                .engines
                .bollinger
                .as_ref()
                .map(|bb| bb.calculate(candles)),
        };
    }
}
