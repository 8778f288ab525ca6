pub mod provider;

use std::sync::Arc;

use error_stack::{Report, bail};
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::analysis::provider::AnalysisProvider;
use crate::error::{AnalysisError, FeedError};
use crate::feed::Feed;
use crate::history::{HistoryEntry, HistoryStore};
use crate::indicator::ma::Sma;
use crate::indicator::{Indicator, latest_value};
use crate::model::{Candle, TimeFrame};
use crate::session::{ChartSession, IndicatorConfig, IndicatorSnapshot};

const HTF_SMA_PERIOD: usize = 20;
const HTF_FETCH_LIMIT: usize = 200;

/// Primary-trend context from a higher timeframe: whether the latest close
/// sits above the 20-period SMA there.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HigherTimeframeContext {
    pub timeframe: TimeFrame,
    pub price_above_sma: bool,
}

/// Everything the AI collaborator sees for one analysis. Immutable once
/// built; a follow-up question builds a fresh request.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub owner_id: String,
    pub symbol: String,
    pub interval: TimeFrame,
    /// Chart snapshot as a base64 data URI.
    pub chart_image: String,
    pub candle_window: Vec<Candle>,
    pub indicators: IndicatorSnapshot,
    pub indicator_config: IndicatorConfig,
    pub higher_timeframe: Option<HigherTimeframeContext>,
    pub question: Option<String>,
    pub prior_analysis: Option<String>,
}

impl AnalysisRequest {
    /// Bundle the session's current state into a request.
    pub fn from_session(
        owner_id: impl Into<String>,
        session: &ChartSession,
        chart_image: String,
        higher_timeframe: Option<HigherTimeframeContext>,
        question: Option<String>,
        prior_analysis: Option<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            symbol: session.symbol().to_owned(),
            interval: session.timeframe(),
            chart_image,
            candle_window: session.candles().to_vec(),
            indicators: session.latest_values(),
            indicator_config: session.config().clone(),
            higher_timeframe,
            question,
            prior_analysis,
        }
    }

    pub fn is_follow_up(&self) -> bool {
        self.question.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Swot {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub opportunities: Vec<String>,
    pub threats: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub entry_price_range: String,
    pub take_profit_levels: Vec<String>,
    pub stop_loss_level: String,
}

/// The collaborator's structured answer. Opaque beyond schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis: String,
    pub swot: Swot,
    pub trade_signal: TradeSignal,
}

/// Trading persona selected by chart interval, mirrored into the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    Scalper,
    SwingTrader,
    PositionTrader,
}

impl Persona {
    pub fn for_interval(interval: TimeFrame) -> Self {
        match interval.approx_minutes() {
            m if m <= 15 => Self::Scalper,
            m if m <= 360 => Self::SwingTrader,
            _ => Self::PositionTrader,
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Self::Scalper => "Act as a SCALPER focusing on immediate momentum.",
            Self::SwingTrader => "Act as a SWING TRADER focusing on patterns.",
            Self::PositionTrader => "Act as a POSITION TRADER focusing on major trends.",
        }
    }
}

/// Build the instruction text sent alongside the chart image.
pub fn build_prompt(request: &AnalysisRequest) -> String {
    let mut prompt = String::from(
        "You are an expert financial analyst who combines technical chart \
         analysis with fundamental event analysis.\n\n",
    );

    if let Some(htf) = &request.higher_timeframe {
        let direction = if htf.price_above_sma {
            "BULLISH"
        } else {
            "BEARISH"
        };
        prompt.push_str(&format!(
            "The primary trend on the {} timeframe is {direction}. \
             Only generate {direction} signals.\n\n",
            htf.timeframe
        ));
    }

    prompt.push_str(Persona::for_interval(request.interval).instruction());
    prompt.push_str("\n\n");

    match (&request.question, &request.prior_analysis) {
        (Some(question), prior) => {
            prompt.push_str("You are refining a previous analysis based on a user's question.\n");
            if let Some(prior) = prior {
                prompt.push_str(&format!("Previous analysis: {prior}\n"));
            }
            prompt.push_str(&format!(
                "User question: {question}\n\
                 Refine the analysis and trade signal to directly address the \
                 question; do not repeat the previous analysis.\n"
            ));
        }
        _ => {
            prompt.push_str(
                "Analyze the provided chart and data to generate a market \
                 analysis, a SWOT breakdown, and a trade signal (entry range, \
                 take profit levels, stop loss).\n",
            );
        }
    }

    prompt
}

/// Fetch higher-timeframe candles and derive the primary-trend flag.
///
/// Returns `None` when the feed has too little history on that timeframe to
/// compute the 20-period SMA.
pub async fn higher_timeframe_context(
    feed: &dyn Feed,
    symbol: &str,
    timeframe: TimeFrame,
) -> Result<Option<HigherTimeframeContext>, Report<FeedError>> {
    let candles = feed
        .fetch_candles(symbol, timeframe, HTF_FETCH_LIMIT)
        .await?;

    let Ok(sma) = Sma::new(HTF_SMA_PERIOD) else {
        return Ok(None);
    };
    if candles.len() < sma.warmup() {
        return Ok(None);
    }
    let Some(sma_latest) = latest_value(&sma.series(&candles)) else {
        return Ok(None);
    };
    let Some(last) = candles.last() else {
        return Ok(None);
    };

    Ok(Some(HigherTimeframeContext {
        timeframe,
        price_above_sma: last.close > sma_latest,
    }))
}

/// Front door for analysis requests: validates preconditions, forwards to
/// the AI collaborator, and persists history off the critical path.
pub struct Orchestrator {
    provider: Arc<dyn AnalysisProvider>,
    history: Arc<dyn HistoryStore>,
    tasks: TaskTracker,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn AnalysisProvider>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            provider,
            history,
            tasks: TaskTracker::new(),
        }
    }

    /// Wait for any in-flight history writes; call before process exit.
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Run one analysis.
    ///
    /// Precondition failures (`MissingChartImage`, `Unauthenticated`) are
    /// rejected locally without touching the network. A successful new
    /// analysis (never a follow-up) is persisted fire-and-forget; a
    /// persistence failure is logged and does not affect the returned
    /// result. No partial history is written on any error path.
    pub async fn request_analysis(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisResult, Report<AnalysisError>> {
        if request.chart_image.trim().is_empty() {
            bail!(AnalysisError::MissingChartImage);
        }
        if request.owner_id.trim().is_empty() {
            bail!(AnalysisError::Unauthenticated);
        }

        let result = self.provider.analyze(&request).await?;

        if !request.is_follow_up() {
            let entry = HistoryEntry::new(
                request.owner_id.clone(),
                request.symbol.clone(),
                request.chart_image.clone(),
                &result,
            );
            let history = Arc::clone(&self.history);
            self.tasks.spawn(async move {
                match history.append(&entry).await {
                    Ok(()) => info!(entry_id = %entry.id, "analysis history entry saved"),
                    Err(e) => warn!(error = ?e, "failed to persist analysis history"),
                }
            });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::testutil::candles_from_closes;
    use futures::future::BoxFuture;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn sample_result() -> AnalysisResult {
        AnalysisResult {
            analysis: "uptrend with strong volume".into(),
            swot: Swot {
                strengths: vec!["momentum".into()],
                weaknesses: vec![],
                opportunities: vec![],
                threats: vec![],
            },
            trade_signal: TradeSignal {
                entry_price_range: "100-101".into(),
                take_profit_levels: vec!["105".into()],
                stop_loss_level: "97".into(),
            },
        }
    }

    fn sample_request(owner: &str, image: &str, question: Option<&str>) -> AnalysisRequest {
        let session = ChartSession::new(
            "BTCUSDT",
            TimeFrame::Hour1,
            200,
            IndicatorConfig::default(),
            candles_from_closes(&[100.0; 30]),
        )
        .unwrap();
        AnalysisRequest::from_session(
            owner,
            &session,
            image.into(),
            None,
            question.map(Into::into),
            None,
        )
    }

    struct StubProvider {
        fail: bool,
        calls: Mutex<usize>,
    }

    impl StubProvider {
        fn ok() -> Self {
            Self {
                fail: false,
                calls: Mutex::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                calls: Mutex::new(0),
            }
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl AnalysisProvider for StubProvider {
        fn analyze(
            &self,
            _request: &AnalysisRequest,
        ) -> BoxFuture<'_, Result<AnalysisResult, Report<AnalysisError>>> {
            *self.calls.lock().unwrap() += 1;
            let response = if self.fail {
                Err(Report::new(AnalysisError::Failed))
            } else {
                Ok(sample_result())
            };
            Box::pin(async move { response })
        }
    }

    /// Records appends on a channel so tests can await the fire-and-forget
    /// persistence without sleeping.
    struct RecordingStore {
        tx: mpsc::UnboundedSender<HistoryEntry>,
    }

    impl RecordingStore {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HistoryEntry>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }
    }

    impl HistoryStore for RecordingStore {
        fn append(
            &self,
            entry: &HistoryEntry,
        ) -> BoxFuture<'_, Result<(), Report<crate::error::HistoryError>>> {
            let _ = self.tx.send(entry.clone());
            Box::pin(async { Ok(()) })
        }

        fn page(
            &self,
            _owner_id: &str,
            _page_size: usize,
            _cursor: Option<chrono::DateTime<chrono::Utc>>,
        ) -> BoxFuture<'_, Result<crate::history::HistoryPage, Report<crate::error::HistoryError>>>
        {
            Box::pin(async {
                Ok(crate::history::HistoryPage {
                    entries: vec![],
                    next_cursor: None,
                })
            })
        }
    }

    #[tokio::test]
    async fn missing_chart_image_rejected_without_provider_call() {
        let provider = Arc::new(StubProvider::ok());
        let (store, _rx) = RecordingStore::new();
        let orchestrator = Orchestrator::new(provider.clone(), store);

        let result = orchestrator
            .request_analysis(sample_request("user-1", "", None))
            .await;
        assert!(matches!(
            result.unwrap_err().current_context(),
            AnalysisError::MissingChartImage
        ));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_owner_rejected_without_provider_call() {
        let provider = Arc::new(StubProvider::ok());
        let (store, _rx) = RecordingStore::new();
        let orchestrator = Orchestrator::new(provider.clone(), store);

        let result = orchestrator
            .request_analysis(sample_request("", "data:image/svg+xml;base64,x", None))
            .await;
        assert!(matches!(
            result.unwrap_err().current_context(),
            AnalysisError::Unauthenticated
        ));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn successful_analysis_persists_one_history_entry() {
        let provider = Arc::new(StubProvider::ok());
        let (store, mut rx) = RecordingStore::new();
        let orchestrator = Orchestrator::new(provider, store);

        let result = orchestrator
            .request_analysis(sample_request("user-1", "data:image/svg+xml;base64,x", None))
            .await
            .unwrap();
        assert_eq!(result.analysis, "uptrend with strong volume");

        let entry = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("history append never happened")
            .unwrap();
        assert_eq!(entry.owner_id, "user-1");
        assert_eq!(entry.symbol, "BTCUSDT");
        assert_eq!(entry.analysis_summary, "uptrend with strong volume");
    }

    #[tokio::test]
    async fn follow_up_question_is_not_persisted() {
        let provider = Arc::new(StubProvider::ok());
        let (store, mut rx) = RecordingStore::new();
        let orchestrator = Orchestrator::new(provider, store);

        orchestrator
            .request_analysis(sample_request(
                "user-1",
                "data:image/svg+xml;base64,x",
                Some("what about volume?"),
            ))
            .await
            .unwrap();

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "follow-up must not write history");
    }

    #[tokio::test]
    async fn provider_failure_writes_no_history() {
        let provider = Arc::new(StubProvider::failing());
        let (store, mut rx) = RecordingStore::new();
        let orchestrator = Orchestrator::new(provider, store);

        let result = orchestrator
            .request_analysis(sample_request("user-1", "data:image/svg+xml;base64,x", None))
            .await;
        assert!(matches!(
            result.unwrap_err().current_context(),
            AnalysisError::Failed
        ));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "failed analysis must not write history");
    }

    #[test]
    fn persona_by_interval() {
        assert_eq!(Persona::for_interval(TimeFrame::Min5), Persona::Scalper);
        assert_eq!(Persona::for_interval(TimeFrame::Min15), Persona::Scalper);
        assert_eq!(Persona::for_interval(TimeFrame::Hour1), Persona::SwingTrader);
        assert_eq!(Persona::for_interval(TimeFrame::Hour6), Persona::SwingTrader);
        assert_eq!(
            Persona::for_interval(TimeFrame::Day1),
            Persona::PositionTrader
        );
        assert_eq!(
            Persona::for_interval(TimeFrame::Week1),
            Persona::PositionTrader
        );
    }

    #[test]
    fn prompt_includes_trend_filter_when_htf_present() {
        let mut request = sample_request("user-1", "data:image/svg+xml;base64,x", None);
        request.higher_timeframe = Some(HigherTimeframeContext {
            timeframe: TimeFrame::Week1,
            price_above_sma: true,
        });
        let prompt = build_prompt(&request);
        assert!(prompt.contains("BULLISH"));
        assert!(prompt.contains("1w"));

        request.higher_timeframe = Some(HigherTimeframeContext {
            timeframe: TimeFrame::Week1,
            price_above_sma: false,
        });
        assert!(build_prompt(&request).contains("BEARISH"));
    }

    #[test]
    fn prompt_switches_to_refine_mode_for_follow_up() {
        let mut request = sample_request(
            "user-1",
            "data:image/svg+xml;base64,x",
            Some("is the stop too tight?"),
        );
        request.prior_analysis = Some("previous text".into());
        let prompt = build_prompt(&request);
        assert!(prompt.contains("refining a previous analysis"));
        assert!(prompt.contains("is the stop too tight?"));
        assert!(prompt.contains("previous text"));

        let fresh = sample_request("user-1", "data:image/svg+xml;base64,x", None);
        assert!(!build_prompt(&fresh).contains("refining"));
    }
}
