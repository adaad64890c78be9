use chrono::NaiveDate;
use rayon::ThreadPoolBuilder;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!("Initialized Rayon thread pool with {} threads", num_threads),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

// ── Data settings ───────────────────────────────────────────────────────────

/// Default cache directory for per-ticker CSV files.
pub const DEFAULT_DATA_DIR: &str = "fixed_stock_data";
/// Default first date kept from any price or factor series.
pub const DEFAULT_START_DATE: &str = "2020-01-01";
/// Delay between consecutive downloads during a bulk fetch.
pub const DEFAULT_FETCH_DELAY_MS: u64 = 250;
/// Attempts per HTTP download before giving up.
pub const DOWNLOAD_ATTEMPTS: usize = 3;
/// Factor cache entries older than this are re-downloaded.
pub const FACTOR_CACHE_MAX_AGE_SECS: u64 = 86_400;

pub const FF3_URL: &str =
    "https://mba.tuck.dartmouth.edu/pages/faculty/ken.french/ftp/F-F_Research_Data_Factors_daily_CSV.zip";
pub const FF3_CACHE_FILE: &str = "ff3_factors_daily.csv";

// ── Analysis settings ───────────────────────────────────────────────────────

/// Trading days per year used for annualization.
pub const TRADING_DAYS: f64 = 252.0;
/// Minimum number of return rows required before running the factor regression.
pub const MIN_REGRESSION_ROWS: usize = 30;
/// Name of the synthetic equal-weight portfolio column.
pub const PORTFOLIO_SERIES: &str = "RiskPortfolio";
/// Benchmark excluded from the data-driven volatility buckets.
pub const BENCHMARK_TICKER: &str = "SP500";
/// Number of data-driven volatility buckets (one per risk score).
pub const RISK_BUCKETS: usize = 10;

/// Rolling volatility windows offered in the UI: (label, trading days).
pub const ROLLING_VOL_CHOICES: &[(&str, usize)] = &[
    ("Weekly (5 trading days)", 5),
    ("Monthly (21 trading days)", 21),
    ("Quarterly (63 trading days)", 63),
];

/// Fixed baskets for risk scores 1 (lowest) through 10 (highest).
pub const STATIC_RISK_PORTFOLIOS: [&[&str]; 10] = [
    &["JNJ", "PG", "KO", "WMT", "PEP"],
    &["VZ", "XOM", "CVX", "SO", "NEE"],
    &["MRK", "ABT", "D", "DUK", "LLY"],
    &["UNH", "HD", "MA", "V", "LOW"],
    &["AAPL", "MSFT", "GOOG", "AMZN", "META"],
    &["JPM", "BA", "CAT", "AXP", "IBM"],
    &["QCOM", "INTC", "ORCL", "UPS", "CSCO"],
    &["TSLA", "NVDA", "SHOP", "RBLX", "SQ"],
    &["ARKK", "PLTR", "CRWD", "DOCU", "AFRM"],
    &["COIN", "AMC", "GME", "FUBO", "BBBY"],
];

pub const MAG7: &[&str] = &["AAPL", "MSFT", "TSLA", "GOOG", "AMZN", "META", "NVDA"];

/// Symbols whose Yahoo Finance ticker differs from the local name.
pub const YAHOO_ALIAS: &[(&str, &str)] = &[("BRK.B", "BRK-B"), ("SP500", "^GSPC")];

pub fn yahoo_symbol(ticker: &str) -> &str {
    YAHOO_ALIAS
        .iter()
        .find(|(local, _)| local.eq_ignore_ascii_case(ticker))
        .map(|(_, remote)| *remote)
        .unwrap_or(ticker)
}

/// Every ticker referenced by the static baskets, the Magnificent 7 and the
/// benchmark, sorted and deduplicated.
pub fn universe() -> Vec<String> {
    let mut tickers: Vec<String> = STATIC_RISK_PORTFOLIOS
        .iter()
        .flat_map(|basket| basket.iter())
        .chain(MAG7.iter())
        .chain(std::iter::once(&BENCHMARK_TICKER))
        .map(|t| t.to_string())
        .collect();
    tickers.sort();
    tickers.dedup();
    tickers
}

// ── Runtime configuration ───────────────────────────────────────────────────

/// Where price data lives and how it may be obtained.
///
/// Built once in `main` and passed explicitly to every loader.
#[derive(Clone, Debug)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub start_date: NaiveDate,
    pub allow_download: bool,
    pub fetch_delay_ms: u64,
}

impl DataConfig {
    pub fn new(data_dir: impl Into<PathBuf>, start_date: NaiveDate, allow_download: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            start_date,
            allow_download,
            fetch_delay_ms: DEFAULT_FETCH_DELAY_MS,
        }
    }

    /// Resolves settings from explicit overrides, then `RISKFACTOR_*`
    /// environment variables, then defaults.
    pub fn resolve(
        data_dir: Option<PathBuf>,
        start_date: Option<NaiveDate>,
        offline: bool,
    ) -> anyhow::Result<Self> {
        Self::resolve_with(data_dir, start_date, offline, env_trimmed)
    }

    fn resolve_with(
        data_dir: Option<PathBuf>,
        start_date: Option<NaiveDate>,
        offline: bool,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let data_dir = data_dir
            .or_else(|| env("RISKFACTOR_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let start_date = match start_date {
            Some(d) => d,
            None => {
                let raw = env("RISKFACTOR_START_DATE")
                    .unwrap_or_else(|| DEFAULT_START_DATE.to_string());
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|e| anyhow::anyhow!("Invalid start date {}: {}", raw, e))?
            }
        };

        let offline = offline
            || env("RISKFACTOR_OFFLINE")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false);

        let fetch_delay_ms = env("RISKFACTOR_FETCH_DELAY_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_FETCH_DELAY_MS);

        Ok(Self {
            data_dir,
            start_date,
            allow_download: !offline,
            fetch_delay_ms,
        })
    }

    /// Creates the cache directory if it does not exist yet. Returns `true`
    /// when it had to be created.
    pub fn ensure_data_dir(&self) -> std::io::Result<bool> {
        if self.data_dir.exists() {
            return Ok(false);
        }
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(true)
    }

    pub fn csv_path(&self, ticker: &str) -> PathBuf {
        self.data_dir.join(format!("{}.csv", ticker))
    }

    pub fn factor_cache_path(&self) -> PathBuf {
        self.data_dir.join(FF3_CACHE_FILE)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
