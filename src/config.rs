use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::session::IndicatorConfig;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_window_capacity() -> usize {
    200
}

fn default_rest_url() -> String {
    "https://api.binance.com".into()
}

fn default_ws_url() -> String {
    "wss://stream.binance.com:9443/stream".into()
}

/// Kline endpoint costs weight 2; ~5000 weight/min allowed. 20 req/s keeps a
/// comfortable safety margin.
fn default_requests_per_second() -> u32 {
    20
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}

fn default_api_key_env() -> String {
    "CHARTSAGE_API_KEY".into()
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Retained candle window size per chart session.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
}

#[derive(Debug, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    /// Generative-model endpoint; required for the `analyze` command.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Identity attached to analysis requests and history entries.
    #[serde(default)]
    pub owner_id: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            owner_id: String::new(),
        }
    }
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    validate_feed(config)?;
    validate_indicators(config)?;
    Ok(())
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.general.window_capacity < 2 {
        return Err(Report::new(ConfigError::Validation {
            field: "general.window_capacity must be >= 2".into(),
        }));
    }
    if !matches!(config.general.log_format.as_str(), "text" | "json") {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format must be \"text\" or \"json\", got \"{}\"",
                config.general.log_format
            ),
        }));
    }
    Ok(())
}

fn validate_feed(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.feed.requests_per_second == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "feed.requests_per_second must be > 0".into(),
        }));
    }
    Ok(())
}

fn validate_indicators(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let indicators = &config.indicators;
    let periods = [
        ("indicators.sma.period", indicators.sma.period),
        ("indicators.rsi.period", indicators.rsi.period),
        ("indicators.macd.fast", indicators.macd.fast),
        ("indicators.macd.slow", indicators.macd.slow),
        ("indicators.macd.signal", indicators.macd.signal),
        ("indicators.bollinger.period", indicators.bollinger.period),
    ];
    for (field, period) in periods {
        if period == 0 {
            return Err(Report::new(ConfigError::Validation {
                field: format!("{field} must be > 0"),
            }));
        }
    }

    if indicators.macd.fast >= indicators.macd.slow {
        return Err(Report::new(ConfigError::Validation {
            field: "indicators.macd.fast must be < indicators.macd.slow".into(),
        }));
    }

    if indicators.bollinger.std_dev <= 0.0 {
        return Err(Report::new(ConfigError::Validation {
            field: "indicators.bollinger.std_dev must be > 0".into(),
        }));
    }

    Ok(())
}
