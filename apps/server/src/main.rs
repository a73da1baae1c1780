//! Book Ingest - Headless Server
//!
//! Keeps one websocket subscription per configured (exchange, symbol) pair
//! and logs what each one delivers.

mod config;
mod sink;

use clap::Parser;
use config::{AppConfig, SessionSettings};
use ingest_core::Exchange;
use ingest_feeds::{SharedSink, Supervisor};
use sink::LoggingSink;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Book Ingest CLI
#[derive(Parser, Debug)]
#[command(name = "book-ingest")]
#[command(about = "Streams exchange order books over websockets", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Track a single exchange instead of the configured sessions (with --symbol)
    #[arg(short, long, requires = "symbol")]
    exchange: Option<String>,

    /// Symbol for --exchange
    #[arg(short, long, requires = "exchange")]
    symbol: Option<String>,

    /// Seconds between sink summaries (overrides the config file)
    #[arg(long)]
    snapshot_interval: Option<u64>,
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// `--log-level` sets the default; `RUST_LOG` directives refine it.
fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(parse_level(level).into())
        .from_env_lossy()
}

fn init_logging(level: &str) {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(level))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

async fn log_sinks(sinks: &[SharedSink]) {
    for sink in sinks {
        let snapshot = sink.read().await.render_snapshot();
        info!("📖 {}", snapshot);
    }
}

/// Log every sink at a fixed interval.
async fn run_snapshot_reporter(sinks: Vec<SharedSink>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        log_sinks(&sinks).await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args.log_level);

    let mut config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let (Some(exchange), Some(symbol)) = (&args.exchange, &args.symbol) {
        config.sessions = vec![SessionSettings::new(exchange, symbol)];
    }
    if let Some(secs) = args.snapshot_interval {
        config.snapshot_interval_secs = secs;
    }

    info!("🚀 Book ingest starting...");
    info!("  Config: {}", args.config);
    info!("  Sessions: {}", config.sessions.len());
    info!("  Max retries: {}", config.session.max_retries);
    info!("  Queue capacity: {}", config.session.queue_capacity);

    let supervisor = Supervisor::new(config.session.clone());
    let mut sinks: Vec<SharedSink> = Vec::with_capacity(config.sessions.len());

    for settings in &config.sessions {
        let exchange: Exchange = match settings.exchange.parse() {
            Ok(exchange) => exchange,
            Err(e) => {
                error!("{}", e);
                supervisor.stop_all().await;
                return ExitCode::FAILURE;
            }
        };
        let sink = ingest_feeds::sink::shared(LoggingSink::new(exchange, &settings.symbol));

        if let Err(e) = supervisor.start(&settings.symbol, &settings.exchange, sink.clone()) {
            error!("{} {}: {}", settings.exchange, settings.symbol, e);
            supervisor.stop_all().await;
            return ExitCode::FAILURE;
        }
        sinks.push(sink);
    }

    let reporter = (config.snapshot_interval_secs > 0).then(|| {
        let interval = Duration::from_secs(config.snapshot_interval_secs);
        tokio::spawn(run_snapshot_reporter(sinks.clone(), interval))
    });

    info!("Press Ctrl+C to stop...");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }

    warn!("Shutdown signal received");
    if let Some(reporter) = reporter {
        reporter.abort();
    }

    let results = supervisor.stop_all().await;
    for (key, state) in &results {
        info!("  {} {}: {}", key.exchange, key.symbol, state.as_str());
    }

    info!("📈 Final counts:");
    log_sinks(&sinks).await;

    info!("👋 Book ingest stopped");
    ExitCode::SUCCESS
}
