mod analysis;
mod chart;
mod config;
mod error;
mod feed;
mod history;
mod indicator;
mod model;
mod session;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use analysis::provider::HttpAnalysisProvider;
use analysis::{AnalysisRequest, Orchestrator, higher_timeframe_context};
use config::AppConfig;
use feed::Feed;
use feed::binance::BinanceFeed;
use history::HistoryStore;
use history::sqlite::SqliteHistoryStore;
use model::{CandleUpdate, TimeFrame, WindowEvent};
use session::ChartSession;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("invalid argument: {name}")]
    Argument { name: String },
    #[display("candle feed error")]
    Feed,
    #[display("history store error")]
    History,
    #[display("analysis error")]
    Analysis,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "chartsage", about = "AI-assisted candlestick chart analysis")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Maintain a live chart session and log indicator updates
    Watch {
        /// Trading pair, e.g. BTCUSDT
        #[arg(short, long)]
        symbol: String,
        /// Chart interval, e.g. 5m, 1h, 1d
        #[arg(short, long, default_value = "1h")]
        interval: String,
    },
    /// Run one AI analysis of the current chart and persist it
    Analyze {
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long, default_value = "1h")]
        interval: String,
        /// Higher timeframe used to determine the primary trend, e.g. 1d, 1w
        #[arg(long)]
        higher_timeframe: Option<String>,
        /// Follow-up question refining a previous analysis (not persisted)
        #[arg(long)]
        question: Option<String>,
        /// Text of the analysis being refined
        #[arg(long)]
        prior_analysis: Option<String>,
    },
    /// Page through persisted analyses, newest first
    History {
        #[arg(long, default_value_t = 10)]
        page_size: usize,
        /// Maximum number of pages to print
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    match cli.command {
        Command::Watch { symbol, interval } => {
            let timeframe = parse_timeframe(&interval)?;
            watch(&config, &symbol, timeframe).await
        }
        Command::Analyze {
            symbol,
            interval,
            higher_timeframe,
            question,
            prior_analysis,
        } => {
            let timeframe = parse_timeframe(&interval)?;
            let htf = higher_timeframe
                .as_deref()
                .map(parse_timeframe)
                .transpose()?;
            if let Some(htf) = htf {
                if htf.approx_minutes() <= timeframe.approx_minutes() {
                    return Err(Report::new(AppError::Argument {
                        name: format!(
                            "higher_timeframe {htf} must be longer than the chart interval {timeframe}"
                        ),
                    }));
                }
            }
            analyze(&config, &symbol, timeframe, htf, question, prior_analysis).await
        }
        Command::History { page_size, pages } => print_history(&config, page_size, pages).await,
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn parse_timeframe(s: &str) -> Result<TimeFrame, Report<AppError>> {
    TimeFrame::from_str(s).ok_or_else(|| {
        Report::new(AppError::Argument {
            name: format!("unknown interval \"{s}\""),
        })
    })
}

fn build_feed(config: &AppConfig) -> Arc<dyn Feed> {
    Arc::new(BinanceFeed::new(
        config.feed.rest_url.clone(),
        config.feed.ws_url.clone(),
        config.feed.requests_per_second,
    ))
}

async fn open_history_store(config: &AppConfig) -> Result<Arc<dyn HistoryStore>, Report<AppError>> {
    let db_path = format!("{}/chartsage.db", config.general.data_dir);
    let store = SqliteHistoryStore::open(Path::new(&db_path))
        .await
        .change_context(AppError::History)?;
    Ok(Arc::new(store))
}

/// Seed a session from REST history. A failed fetch degrades to an empty
/// window (no indicator values) instead of aborting the session.
async fn seed_session(
    config: &AppConfig,
    feed: &dyn Feed,
    symbol: &str,
    timeframe: TimeFrame,
) -> Result<ChartSession, Report<AppError>> {
    let capacity = config.general.window_capacity;
    let history = match feed.fetch_candles(symbol, timeframe, capacity).await {
        Ok(candles) => candles,
        Err(e) => {
            warn!(error = ?e, symbol, "historical fetch failed, starting with empty window");
            Vec::new()
        }
    };

    ChartSession::new(
        symbol,
        timeframe,
        capacity,
        config.indicators.clone(),
        history,
    )
    .change_context(AppError::Config)
}

// ── watch ─────────────────────────────────────────────────────────────────────

async fn watch(
    config: &AppConfig,
    symbol: &str,
    timeframe: TimeFrame,
) -> Result<(), Report<AppError>> {
    let feed = build_feed(config);
    let mut session = seed_session(config, feed.as_ref(), symbol, timeframe).await?;

    info!(
        symbol,
        timeframe = %timeframe,
        candles = session.candles().len(),
        "chart session ready, subscribing to live klines"
    );

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<CandleUpdate>(1024);

    let stream_feed = Arc::clone(&feed);
    let stream_symbol = symbol.to_owned();
    let stream_cancel = cancel.clone();
    let stream_handle = tokio::spawn(async move {
        if let Err(e) = stream_feed
            .subscribe_klines(&stream_symbol, timeframe, tx, stream_cancel)
            .await
        {
            tracing::error!(error = ?e, "kline subscription failed");
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl+c received, shutting down");
                break;
            }
            update = rx.recv() => {
                match update {
                    None => {
                        warn!("kline stream closed");
                        break;
                    }
                    Some(update) => handle_update(&mut session, update),
                }
            }
        }
    }

    // Cancel before dropping the receiver so no update is applied after
    // teardown begins
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream_handle).await;

    info!("session closed");
    Ok(())
}

fn handle_update(session: &mut ChartSession, update: CandleUpdate) {
    let closed = update.closed;
    match session.apply(update) {
        WindowEvent::Ignored => {
            tracing::debug!("stale kline dropped");
            return;
        }
        WindowEvent::Appended {
            evicted: Some(old),
        } => {
            tracing::debug!(open_time = %old.open_time, "oldest candle evicted");
        }
        WindowEvent::Appended { evicted: None } | WindowEvent::ReplacedLast => {}
    }

    if closed {
        let latest = session.latest_values();
        info!(
            candles = session.candles().len(),
            close = session.candles().last().map(|c| c.close),
            sma = latest.sma,
            rsi = latest.rsi,
            macd = latest.macd.map(|m| m.macd_line),
            "bucket closed"
        );
    } else {
        tracing::debug!(
            close = session.candles().last().map(|c| c.close),
            "in-progress bucket revised"
        );
    }
}

// ── analyze ───────────────────────────────────────────────────────────────────

async fn analyze(
    config: &AppConfig,
    symbol: &str,
    timeframe: TimeFrame,
    higher_timeframe: Option<TimeFrame>,
    question: Option<String>,
    prior_analysis: Option<String>,
) -> Result<(), Report<AppError>> {
    if config.analysis.endpoint.is_empty() {
        return Err(Report::new(AppError::Config)
            .attach("analysis.endpoint is required for the analyze command"));
    }

    let feed = build_feed(config);
    let session = seed_session(config, feed.as_ref(), symbol, timeframe).await?;
    if session.candles().is_empty() {
        return Err(Report::new(AppError::Feed).attach("no candle data to analyze"));
    }

    let snapshot = chart::render(&session);
    let chart_image = chart::data_uri(&snapshot);

    // Optional primary-trend context; a failed fetch degrades to no filter
    let htf_context = match higher_timeframe {
        Some(htf) => match higher_timeframe_context(feed.as_ref(), symbol, htf).await {
            Ok(context) => {
                if context.is_none() {
                    warn!(timeframe = %htf, "not enough higher-timeframe data, skipping trend filter");
                }
                context
            }
            Err(e) => {
                warn!(error = ?e, "higher-timeframe fetch failed, skipping trend filter");
                None
            }
        },
        None => None,
    };

    let request = AnalysisRequest::from_session(
        config.analysis.owner_id.clone(),
        &session,
        chart_image,
        htf_context,
        question,
        prior_analysis,
    );

    let api_key = std::env::var(&config.analysis.api_key_env).ok();
    let provider = Arc::new(HttpAnalysisProvider::new(
        config.analysis.endpoint.clone(),
        config.analysis.model.clone(),
        api_key,
    ));
    let store = open_history_store(config).await?;
    let orchestrator = Orchestrator::new(provider, store);

    let result = orchestrator
        .request_analysis(request)
        .await
        .change_context(AppError::Analysis)?;

    let rendered =
        serde_json::to_string_pretty(&result).change_context(AppError::Runtime)?;
    println!("{rendered}");

    // Let the fire-and-forget history write finish before exiting
    orchestrator.flush().await;
    Ok(())
}

// ── history ───────────────────────────────────────────────────────────────────

async fn print_history(
    config: &AppConfig,
    page_size: usize,
    pages: usize,
) -> Result<(), Report<AppError>> {
    let store = open_history_store(config).await?;
    let owner = &config.analysis.owner_id;

    let mut cursor = None;
    for page_index in 0..pages {
        let page = store
            .page(owner, page_size, cursor)
            .await
            .change_context(AppError::History)?;

        if page.entries.is_empty() {
            if page_index == 0 {
                println!("no analysis history for owner \"{owner}\"");
            }
            break;
        }

        for entry in &page.entries {
            println!(
                "{}  {}  {}\n  signal: entry {} / tp {} / sl {}\n  {}",
                entry.timestamp.to_rfc3339(),
                entry.symbol,
                entry.id,
                entry.trade_signal.entry_price_range,
                entry.trade_signal.take_profit_levels.join(", "),
                entry.trade_signal.stop_loss_level,
                entry.analysis_summary,
            );
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(())
}
