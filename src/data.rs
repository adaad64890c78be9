use crate::config::{self, DataConfig, DOWNLOAD_ATTEMPTS};
use crate::error::{Result, RiskError};
use crate::table::PriceTable;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// A single closing-price observation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClosePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Result of loading a ticker list: the aligned price table plus the tickers
/// that could not be loaded.
#[derive(Clone, Debug)]
pub struct LoadedPrices {
    pub table: PriceTable,
    pub missing: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
}

#[derive(Deserialize, Debug)]
struct YahooResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Deserialize, Debug)]
struct YahooQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

// ──────────────────────────────────────────────────────────────────────────────
// CSV parsing
// ──────────────────────────────────────────────────────────────────────────────

/// Parses the date formats found in Yahoo and Nasdaq exports.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        return Some(d);
    }
    // "2020-01-02 00:00:00-05:00" style timestamps keep only the calendar date.
    if s.len() > 10 && s.is_char_boundary(10) {
        if let Ok(d) = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d") {
            return Some(d);
        }
    }
    None
}

/// Parses a price cell, stripping a literal `$` prefix. Returns `None` for
/// anything that is not a finite number.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned = raw.replace('$', "");
    cleaned
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Reads a closing-price series from CSV text.
///
/// `Close/Last` is preferred over `Close` when both are present. Rows with an
/// unparseable price are dropped; an unparseable date is an error. The
/// result is sorted by date, deduplicated (last row wins) and restricted to
/// `date >= start_date`.
pub fn parse_close_csv<R: std::io::Read>(
    reader: R,
    file_name: &str,
    start_date: NaiveDate,
) -> Result<Vec<ClosePoint>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();

    let date_idx = headers
        .iter()
        .position(|h| h == "Date")
        .ok_or_else(|| RiskError::MissingColumn {
            file: file_name.to_string(),
            column: "Date".to_string(),
        })?;
    let close_idx = headers
        .iter()
        .position(|h| h == "Close/Last")
        .or_else(|| headers.iter().position(|h| h == "Close"))
        .ok_or_else(|| RiskError::MissingColumn {
            file: file_name.to_string(),
            column: "Close' or 'Close/Last".to_string(),
        })?;

    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    let mut dropped = 0usize;
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let raw_date = record.get(date_idx).unwrap_or("");
        let date = parse_date(raw_date).ok_or_else(|| RiskError::InvalidDate {
            file: file_name.to_string(),
            line,
            value: raw_date.to_string(),
        })?;
        match record.get(close_idx).and_then(parse_price) {
            Some(close) => {
                by_date.insert(date, close);
            }
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!("{}: dropped {} rows with unparseable prices", file_name, dropped);
    }

    Ok(by_date
        .into_iter()
        .filter(|(date, _)| *date >= start_date)
        .map(|(date, close)| ClosePoint { date, close })
        .collect())
}

pub fn read_close_series(path: &Path, start_date: NaiveDate) -> Result<Vec<ClosePoint>> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let file = std::fs::File::open(path)?;
    parse_close_csv(std::io::BufReader::new(file), &file_name, start_date)
}

/// Writes a normalized `Date,Close` file.
///
/// Rows go to `<name>.csv.tmp` first and are renamed into place, so an
/// interrupted write never leaves a truncated cache file behind.
pub fn write_close_csv(path: &Path, points: &[ClosePoint]) -> Result<()> {
    let tmp = path.with_extension("csv.tmp");
    if let Err(e) = write_rows(&tmp, points) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn write_rows(path: &Path, points: &[ClosePoint]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["Date", "Close"])?;
    for p in points {
        wtr.write_record([p.date.format("%Y-%m-%d").to_string(), p.close.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Aligns per-ticker series on their common dates (inner join).
///
/// Column order follows `series`. Tickers with no observations still yield a
/// column, which empties the table, matching a drop-rows-with-any-gap policy.
pub fn align_series(series: Vec<(String, Vec<ClosePoint>)>) -> Result<PriceTable> {
    if series.is_empty() {
        return Ok(PriceTable::empty());
    }
    let maps: Vec<BTreeMap<NaiveDate, f64>> = series
        .iter()
        .map(|(_, pts)| pts.iter().map(|p| (p.date, p.close)).collect())
        .collect();

    let mut common: BTreeSet<NaiveDate> = maps[0].keys().copied().collect();
    for m in &maps[1..] {
        common.retain(|d| m.contains_key(d));
    }
    let dates: Vec<NaiveDate> = common.into_iter().collect();

    let columns = maps
        .iter()
        .map(|m| dates.iter().filter_map(|d| m.get(d).copied()).collect())
        .collect();
    let names = series.into_iter().map(|(name, _)| name).collect();
    PriceTable::new(dates, names, columns)
}

/// Normalizes a user-supplied ticker or file name (`aapl.csv` → `AAPL`).
pub fn normalize_ticker(item: &str) -> String {
    let trimmed = item.trim();
    let stem = trimmed
        .strip_suffix(".csv")
        .or_else(|| trimmed.strip_suffix(".CSV"))
        .unwrap_or(trimmed);
    let stem = Path::new(stem)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| stem.to_string());
    stem.to_uppercase()
}

// ──────────────────────────────────────────────────────────────────────────────
// Yahoo Finance download
// ──────────────────────────────────────────────────────────────────────────────

fn chart_url(symbol: &str, start_date: NaiveDate) -> String {
    let period1 = start_date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0);
    let period2 = Utc::now().timestamp();
    format!(
        "https://query1.finance.yahoo.com/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
        symbol.replace('^', "%5E"),
        period1,
        period2
    )
}

fn chart_to_points(response: &YahooChartResponse) -> anyhow::Result<Vec<ClosePoint>> {
    let result = response
        .chart
        .result
        .as_ref()
        .and_then(|r| r.first())
        .ok_or(anyhow::anyhow!("No data found"))?;
    let quote = result
        .indicators
        .quote
        .first()
        .ok_or(anyhow::anyhow!("No quote block in response"))?;

    let mut points = Vec::with_capacity(result.timestamp.len());
    for (i, &timestamp) in result.timestamp.iter().enumerate() {
        let Some(Some(close)) = quote.close.get(i) else {
            continue;
        };
        if let Some(dt) = DateTime::<Utc>::from_timestamp(timestamp, 0) {
            points.push(ClosePoint {
                date: dt.date_naive(),
                close: *close,
            });
        }
    }
    Ok(points)
}

async fn fetch_from_api(symbol: &str, start_date: NaiveDate) -> anyhow::Result<Vec<ClosePoint>> {
    let url = chart_url(symbol, start_date);
    let client = reqwest::Client::new();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match client
            .get(&url)
            .header("User-Agent", "Mozilla/5.0")
            .send()
            .await
        {
            Ok(resp) => match resp.json::<YahooChartResponse>().await {
                Ok(resp_json) => return chart_to_points(&resp_json),
                Err(e) => {
                    if attempts >= DOWNLOAD_ATTEMPTS {
                        return Err(e.into());
                    }
                    warn!("Failed to parse JSON for {} (attempt {}/{}): {}", symbol, attempts, DOWNLOAD_ATTEMPTS, e);
                }
            },
            Err(e) => {
                if attempts >= DOWNLOAD_ATTEMPTS {
                    return Err(e.into());
                }
                warn!("Failed to fetch data for {} (attempt {}/{}): {}", symbol, attempts, DOWNLOAD_ATTEMPTS, e);
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }
}

/// Makes sure `<data_dir>/<TICKER>.csv` exists, downloading it when allowed.
/// Returns `true` if the file exists afterwards.
pub async fn ensure_local_csv(cfg: &DataConfig, ticker: &str) -> bool {
    let path = cfg.csv_path(ticker);
    if path.exists() {
        return true;
    }
    if !cfg.allow_download {
        debug!("{} not cached and downloads are disabled", ticker);
        return false;
    }

    let symbol = config::yahoo_symbol(ticker);
    info!("Cache miss for {}, fetching {}...", ticker, symbol);
    let points = match fetch_from_api(symbol, cfg.start_date).await {
        Ok(points) if !points.is_empty() => points,
        Ok(_) => {
            warn!("Yahoo returned no prices for {}", symbol);
            return false;
        }
        Err(e) => {
            warn!("Download failed for {}: {}", symbol, e);
            return false;
        }
    };

    match write_close_csv(&path, &points) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not write {}: {}", path.display(), e);
            false
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Loading
// ──────────────────────────────────────────────────────────────────────────────

/// Loads closing prices for `tickers` into an aligned table.
///
/// Accepts bare tickers or file names. Missing files are downloaded when the
/// configuration allows it; tickers that still cannot be read are reported in
/// `LoadedPrices::missing` instead of failing the whole load.
pub async fn closing_prices(cfg: &DataConfig, tickers: &[String]) -> anyhow::Result<LoadedPrices> {
    cfg.ensure_data_dir()
        .with_context(|| format!("cannot create data directory {}", cfg.data_dir.display()))?;

    let mut series: Vec<(String, Vec<ClosePoint>)> = Vec::new();
    let mut missing: BTreeSet<String> = BTreeSet::new();

    for item in tickers {
        let ticker = normalize_ticker(item);
        if ticker.is_empty() || series.iter().any(|(t, _)| *t == ticker) {
            continue;
        }

        if !ensure_local_csv(cfg, &ticker).await {
            missing.insert(ticker);
            continue;
        }

        match read_close_series(&cfg.csv_path(&ticker), cfg.start_date) {
            Ok(points) if !points.is_empty() => series.push((ticker, points)),
            Ok(_) => {
                warn!("{} has no prices on or after {}", ticker, cfg.start_date);
                missing.insert(ticker);
            }
            Err(e) => {
                warn!("Failed to process {}: {}", ticker, e);
                missing.insert(ticker);
            }
        }
    }

    let table = align_series(series)?;
    info!(
        "Loaded {} tickers x {} aligned dates ({} missing)",
        table.names.len(),
        table.len(),
        missing.len()
    );
    Ok(LoadedPrices {
        table,
        missing: missing.into_iter().collect(),
    })
}

/// Downloads every ticker that is not cached yet. Returns the tickers that
/// failed.
pub async fn prefetch(cfg: &DataConfig, tickers: &[String]) -> anyhow::Result<Vec<String>> {
    cfg.ensure_data_dir()?;
    let mut failed = Vec::new();
    for (idx, item) in tickers.iter().enumerate() {
        let ticker = normalize_ticker(item);
        let cached = cfg.csv_path(&ticker).exists();
        if !ensure_local_csv(cfg, &ticker).await {
            failed.push(ticker);
        }
        if !cached && idx + 1 < tickers.len() && cfg.fetch_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(cfg.fetch_delay_ms)).await;
        }
    }
    Ok(failed)
}

#[cfg(test)]
pub(crate) fn new_mock(names: &[&str], days: usize) -> PriceTable {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default();
    let dates: Vec<NaiveDate> = (0..days)
        .map(|i| start + chrono::Duration::days(i as i64))
        .collect();
    let columns = names
        .iter()
        .map(|_| {
            let mut price: f64 = 100.0;
            (0..days)
                .map(|_| {
                    price *= 1.0 + rng.gen_range(-0.02..0.02);
                    price
                })
                .collect()
        })
        .collect();
    PriceTable::new(dates, names.iter().map(|n| n.to_string()).collect(), columns)
        .unwrap_or_else(|_| PriceTable::empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    }

    #[test]
    fn test_yahoo_close_csv() {
        let csv = "Date,Open,High,Low,Close,Volume\n\
                   2020-01-03,1,1,1,101.5,10\n\
                   2020-01-02,1,1,1,100.0,10\n\
                   2019-12-31,1,1,1,99.0,10\n";
        let pts = parse_close_csv(csv.as_bytes(), "AAPL.csv", start()).unwrap();
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[0].date, NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        assert_eq!(pts[1].close, 101.5);
    }

    #[test]
    fn test_nasdaq_close_last_with_dollar_sign() {
        let csv = "Date,Close/Last,Volume,Open\n\
                   01/03/2020,$101.50,10,$1\n\
                   01/02/2020, $100.00 ,10,$1\n";
        let pts = parse_close_csv(csv.as_bytes(), "MSFT.csv", start()).unwrap();
        assert_eq!(
            pts,
            vec![
                ClosePoint { date: NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(), close: 100.0 },
                ClosePoint { date: NaiveDate::from_ymd_opt(2020, 1, 3).unwrap(), close: 101.5 },
            ]
        );
    }

    #[test]
    fn test_unparseable_prices_are_dropped() {
        let csv = "Date,Close\n2020-01-02,null\n2020-01-03,12.5\n2020-01-06,\n";
        let pts = parse_close_csv(csv.as_bytes(), "X.csv", start()).unwrap();
        assert_eq!(pts.len(), 1);
        assert_eq!(pts[0].close, 12.5);
    }

    #[test]
    fn test_missing_date_column_names_file() {
        let csv = "Day,Close\n2020-01-02,1\n";
        let err = parse_close_csv(csv.as_bytes(), "BAD.csv", start()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("BAD.csv"), "{}", msg);
        assert!(msg.contains("Date"), "{}", msg);
    }

    #[test]
    fn test_missing_close_column_names_file() {
        let csv = "Date,Open\n2020-01-02,1\n";
        let err = parse_close_csv(csv.as_bytes(), "NOCLOSE.csv", start()).unwrap_err();
        assert!(matches!(err, RiskError::MissingColumn { ref file, .. } if file == "NOCLOSE.csv"));
    }

    #[test]
    fn test_invalid_date_is_an_error() {
        let csv = "Date,Close\nnot-a-date,1\n";
        let err = parse_close_csv(csv.as_bytes(), "X.csv", start()).unwrap_err();
        assert!(matches!(err, RiskError::InvalidDate { .. }));
    }

    #[test]
    fn test_timestamp_dates() {
        assert_eq!(
            parse_date("2020-01-02 00:00:00-05:00"),
            NaiveDate::from_ymd_opt(2020, 1, 2)
        );
    }

    #[test]
    fn test_align_series_inner_join() {
        let d = |day| NaiveDate::from_ymd_opt(2020, 1, day).unwrap();
        let a = vec![
            ClosePoint { date: d(2), close: 1.0 },
            ClosePoint { date: d(3), close: 2.0 },
            ClosePoint { date: d(6), close: 3.0 },
        ];
        let b = vec![
            ClosePoint { date: d(3), close: 20.0 },
            ClosePoint { date: d(6), close: 30.0 },
            ClosePoint { date: d(7), close: 40.0 },
        ];
        let table = align_series(vec![("A".into(), a), ("B".into(), b)]).unwrap();
        assert_eq!(table.dates, vec![d(3), d(6)]);
        assert_eq!(table.names, vec!["A", "B"]);
        assert_eq!(table.column("A").unwrap(), &[2.0, 3.0]);
        assert_eq!(table.column("B").unwrap(), &[20.0, 30.0]);
    }

    #[test]
    fn test_normalize_ticker() {
        assert_eq!(normalize_ticker("aapl.csv"), "AAPL");
        assert_eq!(normalize_ticker("data/brk.b.csv"), "BRK.B");
        assert_eq!(normalize_ticker(" msft "), "MSFT");
    }

    #[test]
    fn test_write_then_read_normalized_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("KO.csv");
        let pts = vec![
            ClosePoint { date: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(), close: 50.25 },
            ClosePoint { date: NaiveDate::from_ymd_opt(2021, 3, 2).unwrap(), close: 50.5 },
        ];
        write_close_csv(&path, &pts).unwrap();
        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("Date,Close\n"));
        assert_eq!(read_close_series(&path, start()).unwrap(), pts);
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("PEP.csv");
        let pts = vec![ClosePoint { date: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(), close: 170.0 }];
        write_close_csv(&path, &pts).unwrap();
        assert!(path.exists());
        assert!(!tmp.path().join("PEP.csv.tmp").exists());
    }

    #[test]
    fn test_failed_write_leaves_no_cache_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("missing_dir").join("PEP.csv");
        let pts = vec![ClosePoint { date: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(), close: 170.0 }];
        assert!(write_close_csv(&path, &pts).is_err());
        assert!(!path.exists());
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_rename_failure_cleans_up_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        // A non-empty directory at the target path makes the rename fail.
        let path = tmp.path().join("PEP.csv");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();
        let pts = vec![ClosePoint { date: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(), close: 170.0 }];
        assert!(write_close_csv(&path, &pts).is_err());
        assert!(!tmp.path().join("PEP.csv.tmp").exists());
    }

    #[tokio::test]
    async fn test_closing_prices_offline_reports_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = DataConfig::new(tmp.path(), start(), false);
        std::fs::write(cfg.csv_path("AAA"), "Date,Close\n2020-01-02,10\n2020-01-03,11\n2020-01-06,12\n").unwrap();
        std::fs::write(cfg.csv_path("BBB"), "Date,Close/Last\n01/03/2020,$5\n01/06/2020,$6\n").unwrap();
        std::fs::write(cfg.csv_path("BAD"), "When,Price\n2020-01-02,1\n").unwrap();

        let tickers: Vec<String> = ["aaa", "BBB.csv", "BAD", "NOPE"].iter().map(|s| s.to_string()).collect();
        let loaded = closing_prices(&cfg, &tickers).await.unwrap();
        assert_eq!(loaded.table.names, vec!["AAA", "BBB"]);
        assert_eq!(loaded.table.len(), 2);
        assert_eq!(loaded.missing, vec!["BAD", "NOPE"]);
    }

    #[test]
    fn test_chart_response_skips_null_closes() {
        let json = r#"{"chart":{"result":[{"timestamp":[1577975400,1578061800,1578321000],
            "indicators":{"quote":[{"close":[75.08,null,74.95]}]}}]}}"#;
        let resp: YahooChartResponse = serde_json::from_str(json).unwrap();
        let pts = chart_to_points(&resp).unwrap();
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[0].date, NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        assert_eq!(pts[1].close, 74.95);
    }
}
