mod analysis;
mod app;
mod config;
mod data;
mod error;
mod factors;
mod horizon;
mod portfolio;
mod profiles;
mod regression;
mod report;
mod table;
mod tui;
mod ui;
mod view;

use app::App;
use chrono::NaiveDate;
use clap::Parser;
use config::{DataConfig, PORTFOLIO_SERIES};
use horizon::TimeRange;
use portfolio::RiskMode;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use view::AnalysisParams;

const LOG_FILE: &str = "riskfactor-tui.log";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "RiskFactor-TUI: equity risk buckets, rolling volatility and Fama-French 3-factor regression",
    after_help = "EXAMPLES:
    # Interactive terminal UI
    cargo run --release

    # Download every universe ticker into the cache
    cargo run --release -- --prefetch

    # Print a one-shot report from cached data only
    cargo run --release -- --report --offline --range 1Y --risk-score 8 --mode volatility"
)]
struct Args {
    /// Directory holding per-ticker CSV files and the factor cache
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Ignore prices before this date (YYYY-MM-DD, default: 2020-01-01)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Never download; use cached files only
    #[arg(long)]
    offline: bool,

    /// Print the analysis and profile tables to stdout instead of starting the TUI
    #[arg(long)]
    report: bool,

    /// Download every universe ticker that is not cached yet, then exit
    #[arg(long)]
    prefetch: bool,

    /// Analysis time range
    #[arg(long, value_enum, default_value_t = TimeRange::Max)]
    range: TimeRange,

    /// Rolling volatility window in trading days (5 = weekly, 21 = monthly, 63 = quarterly)
    #[arg(long, default_value_t = 5)]
    window: usize,

    /// Risk score, 1 = lowest risk, 10 = highest
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
    risk_score: u8,

    /// How the risk score picks tickers
    #[arg(long, value_enum, default_value_t = RiskMode::Static)]
    mode: RiskMode,

    /// Time range for the stock profile statistics
    #[arg(long, value_enum, default_value_t = TimeRange::SixMonths)]
    profile_range: TimeRange,

    /// Comma-separated series to display (tickers and/or RiskPortfolio)
    #[arg(long, value_delimiter = ',')]
    series: Vec<String>,
}

/// Logs go to stderr for one-shot commands and to a file while the TUI owns
/// the terminal.
fn init_tracing(cfg: &DataConfig, interactive: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("riskfactor_tui=info"));

    if interactive {
        let path = cfg.data_dir().join(LOG_FILE);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let cfg = DataConfig::resolve(args.data_dir.clone(), args.start_date, args.offline)?;
    let created = cfg.ensure_data_dir()?;
    let interactive = !args.report && !args.prefetch;
    init_tracing(&cfg, interactive)?;
    if created {
        info!("Created data directory {}", cfg.data_dir().display());
    }
    config::init_cpu_parallelism();

    let universe = config::universe();

    if args.prefetch {
        if !cfg.allow_download {
            warn!("--prefetch with downloads disabled only checks the cache");
        }
        let failed = data::prefetch(&cfg, &universe).await?;
        report::print_prefetch(universe.len(), &failed);
        return Ok(());
    }

    if interactive {
        println!(
            "Loading market data from {} (log: {})...",
            cfg.data_dir().display(),
            cfg.data_dir().join(LOG_FILE).display()
        );
    }

    let loaded = data::closing_prices(&cfg, &universe).await?;
    if loaded.table.is_empty() {
        error!("No price data loaded from {}", cfg.data_dir().display());
        anyhow::bail!(
            "No price data loaded (even after attempting downloads). Check tickers or internet connection."
        );
    }

    let mut notices = Vec::new();
    if !loaded.missing.is_empty() {
        notices.push(format!(
            "Some tickers could not be loaded and will be skipped: {}",
            loaded.missing.join(", ")
        ));
    }

    let factors = match factors::ff3_factors(&cfg).await {
        Ok(table) => {
            info!("Loaded {} days of Fama-French factors", table.len());
            Some(table)
        }
        Err(e) => {
            warn!("Fama-French factors unavailable: {:#}", e);
            notices.push(format!("Fama-French factors unavailable: {}", e));
            None
        }
    };

    let series = if args.series.is_empty() {
        vec![PORTFOLIO_SERIES.to_string()]
    } else {
        args.series
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s.eq_ignore_ascii_case(PORTFOLIO_SERIES) {
                    PORTFOLIO_SERIES.to_string()
                } else {
                    s.to_uppercase()
                }
            })
            .collect()
    };
    let params = AnalysisParams {
        range: args.range,
        window: args.window,
        score: args.risk_score,
        mode: args.mode,
        series,
    };

    if args.report {
        for notice in &notices {
            println!("ℹ  {}", notice);
        }
        let analysis = view::build_analysis(&loaded.table, factors.as_ref(), &params)
            .map_err(|e| view::user_message(&e));
        let profiles = view::build_profiles(&loaded.table, args.profile_range);
        report::print_report(&analysis, &profiles, args.profile_range);
        return Ok(());
    }

    let mut app = App::new(loaded.table, factors, params, args.profile_range, notices);
    let mut terminal = tui::init()?;
    let res = app.run(&mut terminal);

    tui::restore()?;

    if let Err(e) = res {
        error!("Error: {:?}", e);
    }

    Ok(())
}
