use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum FeedError {
    #[display("candle feed unavailable")]
    Unavailable,
    #[display("failed to connect to feed stream")]
    Connection,
    #[display("feed stream dropped")]
    StreamDropped,
    #[display("failed to parse feed response")]
    ResponseParse,
}

#[derive(Debug, Display, Error)]
pub enum IndicatorError {
    #[display("invalid parameter: {name}")]
    InvalidParameter { name: String },
}

#[derive(Debug, Display, Error)]
pub enum AnalysisError {
    #[display("chart image is missing")]
    MissingChartImage,
    #[display("no authenticated owner for this request")]
    Unauthenticated,
    #[display("analysis request failed")]
    Failed,
    #[display("analysis response did not match the expected schema")]
    SchemaMismatch,
}

#[derive(Debug, Display, Error)]
pub enum HistoryError {
    #[display("history store migration failed")]
    Migration,
    #[display("failed to persist history entry")]
    Persistence,
    #[display("failed to query history")]
    Query,
}
