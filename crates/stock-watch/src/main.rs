mod render;

use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use stock_poller::{AnalysisClient, AnalysisState, HttpTransport, PollOptions};
use stock_proto::config::Config;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "stockwatch", version, about = "Start a stock analysis and follow it to the end")]
struct Args {
    /// Ticker symbol to analyse
    #[arg(required_unless_present = "attach")]
    ticker: Option<String>,

    /// Follow an analysis that is already running instead of starting one
    #[arg(long, value_name = "ID", conflicts_with = "ticker")]
    attach: Option<String>,

    /// Override `api.base_url` from config.toml
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    #[arg(long, value_name = "MS")]
    initial_delay_ms: Option<u64>,

    #[arg(long, value_name = "MS")]
    max_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = stock_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = stock_proto::platform::log_path();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // RUST_LOG wins; otherwise keep the HTTP client internals quiet.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        "info,stock_poller=debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string()
    });
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("stockwatch log: {}", log_path.display());

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    if let Some(base_url) = args.base_url {
        config.api.base_url = base_url;
    }
    if let Some(ms) = args.initial_delay_ms {
        config.polling.initial_delay_ms = ms;
    }
    if let Some(ms) = args.max_delay_ms {
        config.polling.max_delay_ms = ms;
    }
    info!(base_url = config.api.base_url.as_str(), "stockwatch starting");

    let transport = HttpTransport::new(&config.api).context("building HTTP client")?;
    let client = AnalysisClient::new(Arc::new(transport), PollOptions::from(&config.polling));
    let mut rx = client.store().subscribe();

    match (args.attach, args.ticker) {
        (Some(analysis_id), _) => {
            client.attach(&analysis_id);
            stamp(&format!("Following analysis {}", analysis_id));
        }
        (None, Some(ticker)) => {
            let analysis_id = client
                .analyze(&ticker)
                .await
                .with_context(|| format!("starting analysis for {}", ticker))?;
            stamp(&format!("Analysis {} started for {}", analysis_id, ticker));
        }
        (None, None) => return Err(anyhow!("a ticker or --attach ID is required")),
    }

    let done = tokio::select! {
        state = follow(&mut rx) => state,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, dropping analysis");
            client.reset();
            stamp("Interrupted");
            return Ok(());
        }
    };

    if let Some(error) = done.error {
        return Err(anyhow!(error).context("analysis failed"));
    }
    if let Some(results) = &done.results {
        println!();
        println!("{}", render::results(results));
    }
    Ok(())
}

/// Print each published change until polling stops, then hand back the
/// final snapshot.
async fn follow(rx: &mut watch::Receiver<AnalysisState>) -> AnalysisState {
    let mut prev: Option<AnalysisState> = None;
    loop {
        let state = rx.borrow_and_update().clone();
        for line in render::describe(prev.as_ref(), &state) {
            stamp(&line);
        }
        if !state.is_polling() {
            return state;
        }
        prev = Some(state);
        if rx.changed().await.is_err() {
            // Sender gone: the latest value is all we will ever see.
            return rx.borrow().clone();
        }
    }
}

fn stamp(line: &str) {
    println!("{} {}", chrono::Local::now().format("%H:%M:%S"), line);
}
