use crate::config::{DataConfig, DOWNLOAD_ATTEMPTS, FACTOR_CACHE_MAX_AGE_SECS, FF3_URL};
use crate::error::{Result, RiskError};
use crate::table::DatedTable;
use anyhow::Context;
use chrono::NaiveDate;
use flate2::read::DeflateDecoder;
use std::io::Read;
use tracing::{info, warn};

pub const MKT_RF: &str = "Mkt-RF";
pub const SMB: &str = "SMB";
pub const HML: &str = "HML";
pub const RF: &str = "RF";
pub const FACTOR_COLUMNS: [&str; 4] = [MKT_RF, SMB, HML, RF];

/// Daily Fama-French factors as decimals (already divided by 100).
pub type FactorTable = DatedTable<f64>;

const ZIP_LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const ZIP_LOCAL_HEADER_LEN: usize = 30;

fn le_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn le_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Extracts the first entry of a zip archive as text.
///
/// Only the local header of the first entry is read; stored and deflated
/// entries are supported, which covers the factor library archives.
pub fn extract_first_entry(archive: &[u8]) -> Result<String> {
    let bad = |msg: &str| RiskError::FactorFormat(format!("zip archive: {}", msg));

    if le_u32(archive, 0) != Some(ZIP_LOCAL_HEADER_SIG) {
        return Err(bad("missing local file header"));
    }
    let flags = le_u16(archive, 6).ok_or_else(|| bad("truncated header"))?;
    let method = le_u16(archive, 8).ok_or_else(|| bad("truncated header"))?;
    let compressed_size = le_u32(archive, 18).ok_or_else(|| bad("truncated header"))? as usize;
    let name_len = le_u16(archive, 26).ok_or_else(|| bad("truncated header"))? as usize;
    let extra_len = le_u16(archive, 28).ok_or_else(|| bad("truncated header"))? as usize;

    let data_start = ZIP_LOCAL_HEADER_LEN + name_len + extra_len;
    // Bit 3: sizes live in a trailing data descriptor, so read to the end.
    let data_end = if flags & 0x08 != 0 || compressed_size == 0 {
        archive.len()
    } else {
        data_start + compressed_size
    };
    let data = archive
        .get(data_start..data_end)
        .ok_or_else(|| bad("entry data out of bounds"))?;

    let mut text = String::new();
    match method {
        0 => text.push_str(&String::from_utf8_lossy(data)),
        8 => {
            let mut raw = Vec::new();
            DeflateDecoder::new(data).read_to_end(&mut raw)?;
            text.push_str(&String::from_utf8_lossy(&raw));
        }
        other => return Err(bad(&format!("unsupported compression method {}", other))),
    }
    Ok(text)
}

/// Parses the daily 3-factor CSV.
///
/// The first three lines are preamble, the fourth is the header. Only rows
/// whose date field is purely numeric (`YYYYMMDD`) are kept, which drops the
/// copyright footer and any appended annual block. Values are converted from
/// percent to decimals and restricted to `date >= start_date`.
pub fn parse_ff3_csv(text: &str, start_date: NaiveDate) -> Result<FactorTable> {
    let body: String = text.lines().skip(3).collect::<Vec<_>>().join("\n");
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let header_len = rdr.headers()?.len();
    if header_len < 5 {
        return Err(RiskError::FactorFormat(format!(
            "expected 5 columns (Date, {}), found {}",
            FACTOR_COLUMNS.join(", "),
            header_len
        )));
    }

    let mut dates = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); FACTOR_COLUMNS.len()];
    let mut last: Option<NaiveDate> = None;

    for record in rdr.records() {
        let record = record?;
        let raw_date = record.get(0).unwrap_or("");
        if raw_date.is_empty() || !raw_date.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if record.len() < 5 || record.iter().skip(1).take(4).any(|v| v.is_empty()) {
            continue;
        }
        // Annual rows (YYYY) share the numeric test but are not daily dates.
        let Ok(date) = NaiveDate::parse_from_str(raw_date, "%Y%m%d") else {
            continue;
        };
        if date < start_date {
            continue;
        }
        if last.is_some_and(|prev| date <= prev) {
            return Err(RiskError::FactorFormat(format!(
                "dates not ascending at {}",
                raw_date
            )));
        }

        for (col, raw) in columns.iter_mut().zip(record.iter().skip(1)) {
            let value: f64 = raw.parse().map_err(|_| {
                RiskError::FactorFormat(format!("non-numeric value '{}' on {}", raw, raw_date))
            })?;
            col.push(value / 100.0);
        }
        dates.push(date);
        last = Some(date);
    }

    FactorTable::new(
        dates,
        FACTOR_COLUMNS.iter().map(|c| c.to_string()).collect(),
        columns,
    )
}

async fn download_ff3_archive() -> anyhow::Result<Vec<u8>> {
    let client = reqwest::Client::new();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = async {
            let resp = client
                .get(FF3_URL)
                .timeout(std::time::Duration::from_secs(60))
                .send()
                .await?
                .error_for_status()?;
            Ok::<_, reqwest::Error>(resp.bytes().await?.to_vec())
        }
        .await;

        match result {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                if attempts >= DOWNLOAD_ATTEMPTS {
                    return Err(e.into());
                }
                warn!("Failed to fetch factor file (attempt {}/{}): {}", attempts, DOWNLOAD_ATTEMPTS, e);
            }
        }
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }
}

fn cache_age_secs(path: &std::path::Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    std::time::SystemTime::now()
        .duration_since(modified)
        .ok()
        .map(|d| d.as_secs())
}

/// What to do with the factor cache given its age in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CacheAction {
    UseCache,
    /// Fetch a fresh archive; `stale_fallback` means a usable old copy exists.
    Download { stale_fallback: bool },
    Unavailable,
}

fn cache_action(age: Option<u64>, allow_download: bool) -> CacheAction {
    match age {
        Some(age) if age < FACTOR_CACHE_MAX_AGE_SECS => CacheAction::UseCache,
        Some(_) if !allow_download => CacheAction::UseCache,
        Some(_) => CacheAction::Download { stale_fallback: true },
        None if allow_download => CacheAction::Download { stale_fallback: false },
        None => CacheAction::Unavailable,
    }
}

fn load_cached(cfg: &DataConfig) -> anyhow::Result<FactorTable> {
    let cache_path = cfg.factor_cache_path();
    let text = std::fs::read_to_string(&cache_path)
        .with_context(|| format!("reading {}", cache_path.display()))?;
    Ok(parse_ff3_csv(&text, cfg.start_date)?)
}

/// Turns a download attempt into factors. The cache is only replaced once
/// the archive extracts and parses; any failure falls back to the old copy
/// when one exists.
fn apply_download(
    cfg: &DataConfig,
    fetched: anyhow::Result<Vec<u8>>,
    stale_fallback: bool,
) -> anyhow::Result<FactorTable> {
    let parsed = fetched.and_then(|bytes| {
        let text = extract_first_entry(&bytes)?;
        let table = parse_ff3_csv(&text, cfg.start_date)?;
        Ok((text, table))
    });

    match parsed {
        Ok((text, table)) => {
            let cache_path = cfg.factor_cache_path();
            let tmp_path = cache_path.with_extension("csv.tmp");
            let written = std::fs::write(&tmp_path, &text)
                .and_then(|_| std::fs::rename(&tmp_path, &cache_path));
            if let Err(e) = written {
                let _ = std::fs::remove_file(&tmp_path);
                warn!("Could not cache factors at {}: {}", cache_path.display(), e);
            }
            Ok(table)
        }
        Err(e) if stale_fallback => {
            warn!("Factor refresh failed ({:#}); using stale cache", e);
            load_cached(cfg)
        }
        Err(e) => Err(e.context("Fama-French factor download failed")),
    }
}

/// Loads the daily factors, preferring a cache younger than a day.
///
/// A stale cache is still used when downloads are disabled or fail.
pub async fn ff3_factors(cfg: &DataConfig) -> anyhow::Result<FactorTable> {
    cfg.ensure_data_dir()?;
    let cache_path = cfg.factor_cache_path();

    match cache_action(cache_age_secs(&cache_path), cfg.allow_download) {
        CacheAction::UseCache => {
            info!("Loading Fama-French factors from cache...");
            load_cached(cfg)
        }
        CacheAction::Unavailable => Err(anyhow::anyhow!(
            "Fama-French factors are not cached at {} and downloads are disabled",
            cache_path.display()
        )),
        CacheAction::Download { stale_fallback } => {
            info!("Fetching Fama-French daily factors...");
            let fetched = download_ff3_archive().await;
            apply_download(cfg, fetched, stale_fallback)
        }
    }
}
