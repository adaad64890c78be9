use crate::analysis::{StdDev, std_dev};
use crate::config::{BENCHMARK_TICKER, RISK_BUCKETS, STATIC_RISK_PORTFOLIOS, TRADING_DAYS};
use crate::error::{Result, RiskError};
use crate::table::ReturnTable;
use clap::ValueEnum;
use tracing::{debug, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Configuration
// ──────────────────────────────────────────────────────────────────────────────

/// How a risk score is turned into a basket of tickers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RiskMode {
    /// Fixed baskets defined in code.
    Static,
    /// Deciles by annualized realized volatility over the selected range.
    Volatility,
}

impl RiskMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Static => "Predefined (static)",
            Self::Volatility => "Data-driven (by volatility)",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            Self::Static => Self::Volatility,
            Self::Volatility => Self::Static,
        }
    }
}

pub const MIN_RISK_SCORE: u8 = 1;
pub const MAX_RISK_SCORE: u8 = 10;

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// The tickers chosen for a risk score, plus those skipped for lack of data.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioSelection {
    pub score: u8,
    pub mode: RiskMode,
    pub tickers: Vec<String>,
    pub missing: Vec<String>,
}

fn check_score(score: u8) -> Result<usize> {
    if !(MIN_RISK_SCORE..=MAX_RISK_SCORE).contains(&score) {
        return Err(RiskError::InvalidParameter(format!(
            "risk score must be between {} and {}, got {}",
            MIN_RISK_SCORE, MAX_RISK_SCORE, score
        )));
    }
    Ok(score as usize - 1)
}

// ──────────────────────────────────────────────────────────────────────────────
// Buckets
// ──────────────────────────────────────────────────────────────────────────────

/// The fixed basket for a risk score.
pub fn static_portfolio(score: u8) -> Result<Vec<String>> {
    let idx = check_score(score)?;
    Ok(STATIC_RISK_PORTFOLIOS[idx].iter().map(|t| t.to_string()).collect())
}

/// Splits `items` into `parts` contiguous groups whose sizes differ by at
/// most one, larger groups first.
pub fn array_split<T: Clone>(items: &[T], parts: usize) -> Vec<Vec<T>> {
    if parts == 0 {
        return Vec::new();
    }
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        out.push(items[start..start + size].to_vec());
        start += size;
    }
    out
}

/// Annualized sample volatility per ticker, sorted ascending. The benchmark
/// is excluded and tickers without a defined volatility are dropped.
pub fn annualized_volatility_ranking(returns: &ReturnTable) -> Result<Vec<(String, f64)>> {
    let candidates: Vec<usize> = returns
        .names
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != BENCHMARK_TICKER)
        .map(|(i, _)| i)
        .collect();
    if candidates.len() < 2 {
        return Err(RiskError::InsufficientData(format!(
            "Need at least 2 tickers (ex-{}) to form data-driven buckets.",
            BENCHMARK_TICKER
        )));
    }

    let mut ranking: Vec<(String, f64)> = candidates
        .into_iter()
        .filter_map(|i| {
            let col: Vec<f64> = returns.columns[i].iter().copied().filter(|v| v.is_finite()).collect();
            std_dev(&col, StdDev::Sample)
                .map(|sd| (returns.names[i].clone(), sd * TRADING_DAYS.sqrt()))
        })
        .collect();
    if ranking.is_empty() {
        return Err(RiskError::InsufficientData(
            "No valid volatility data to build data-driven buckets.".to_string(),
        ));
    }
    ranking.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(ranking)
}

/// Volatility deciles: bucket 1 holds the calmest tickers, bucket 10 the
/// most volatile.
pub fn volatility_buckets(returns: &ReturnTable) -> Result<Vec<Vec<String>>> {
    let ranking = annualized_volatility_ranking(returns)?;
    let names: Vec<String> = ranking.into_iter().map(|(name, _)| name).collect();
    Ok(array_split(&names, RISK_BUCKETS))
}

/// Resolves a risk score to the tickers available in `returns`.
///
/// Static baskets skip tickers without data and report them in `missing`;
/// the call fails only when nothing is left.
pub fn select_portfolio(returns: &ReturnTable, mode: RiskMode, score: u8) -> Result<PortfolioSelection> {
    let idx = check_score(score)?;
    match mode {
        RiskMode::Static => {
            let basket = static_portfolio(score)?;
            let (tickers, missing): (Vec<String>, Vec<String>) =
                basket.into_iter().partition(|t| returns.has_column(t));
            if !missing.is_empty() {
                warn!("Missing data for: {} - they will be skipped.", missing.join(", "));
            }
            if tickers.is_empty() {
                return Err(RiskError::InsufficientData(
                    "None of the tickers in this risk portfolio have data for the selected time range."
                        .to_string(),
                ));
            }
            Ok(PortfolioSelection { score, mode, tickers, missing })
        }
        RiskMode::Volatility => {
            let buckets = volatility_buckets(returns)?;
            let tickers = buckets.get(idx).cloned().unwrap_or_default();
            if tickers.is_empty() {
                return Err(RiskError::EmptyBucket(score));
            }
            Ok(PortfolioSelection {
                score,
                mode,
                tickers,
                missing: Vec::new(),
            })
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Equal-Weight Portfolio
// ──────────────────────────────────────────────────────────────────────────────

/// Daily return of an equal-weight portfolio of `tickers`.
///
/// Tickers are upper-cased. Every requested ticker must be present in
/// `returns`; otherwise the call fails with `RiskError::UnknownTickers`
/// listing the absent ones.
pub fn equal_weight_portfolio(returns: &ReturnTable, tickers: &[String]) -> Result<Vec<f64>> {
    let mut wanted: Vec<String> = Vec::with_capacity(tickers.len());
    for t in tickers.iter().map(|t| t.trim().to_uppercase()).filter(|t| !t.is_empty()) {
        if !wanted.contains(&t) {
            wanted.push(t);
        }
    }
    if wanted.is_empty() {
        return Err(RiskError::InvalidParameter("no tickers selected".to_string()));
    }

    let members = returns.select(&wanted)?;
    let weight = 1.0 / wanted.len() as f64;
    let portfolio: Vec<f64> = (0..members.len())
        .map(|row| members.columns.iter().map(|c| c[row] * weight).sum::<f64>())
        .collect();

    debug!("Equal-weight portfolio over {} tickers: {}", wanted.len(), wanted.join(", "));
    Ok(portfolio)
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;

    fn returns_table(names: &[&str], columns: Vec<Vec<f64>>) -> ReturnTable {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let len = columns.first().map(|c| c.len()).unwrap_or(0);
        let dates = (0..len).map(|i| start + chrono::Duration::days(i as i64)).collect();
        ReturnTable::new(dates, names.iter().map(|n| n.to_string()).collect(), columns).unwrap()
    }

    #[test]
    fn test_equal_weight_example() {
        let returns = returns_table(&["A", "B"], vec![vec![0.02, 0.04], vec![0.00, 0.02]]);
        let p = equal_weight_portfolio(&returns, &["a".into(), "B".into()]).unwrap();
        assert_abs_diff_eq!(p[0], 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1], 0.03, epsilon = 1e-12);
    }

    #[test]
    fn test_equal_weight_is_mean_for_every_subset() {
        let table = crate::data::new_mock(&["A", "B", "C", "D"], 40);
        let returns = crate::analysis::calculate_returns(&table);
        let names = ["A", "B", "C", "D"];
        for mask in 1u32..16 {
            let subset: Vec<String> = names
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, n)| n.to_string())
                .collect();
            let p = equal_weight_portfolio(&returns, &subset).unwrap();
            for row in 0..returns.len() {
                let mean = subset.iter().map(|t| returns.column(t).unwrap()[row]).sum::<f64>()
                    / subset.len() as f64;
                assert_abs_diff_eq!(p[row], mean, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_unknown_ticker_is_rejected() {
        let returns = returns_table(&["A"], vec![vec![0.01, 0.02]]);
        let err = equal_weight_portfolio(&returns, &["A".into(), "ZZZ".into()]).unwrap_err();
        assert!(matches!(err, RiskError::UnknownTickers(ref t) if t == &vec!["ZZZ".to_string()]));
        assert!(err.to_string().contains("No data for requested ticker(s): ZZZ"));
    }

    #[test]
    fn test_array_split_sizes() {
        let items: Vec<usize> = (0..23).collect();
        let groups = array_split(&items, 10);
        let sizes: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 2, 2, 2, 2, 2, 2, 2]);
        assert_eq!(groups[3][0], 9);
        let small = array_split(&items[..4], 10);
        assert_eq!(small.iter().filter(|g| g.is_empty()).count(), 6);
    }

    #[test]
    fn test_static_selection_skips_missing() {
        let returns = returns_table(&["JNJ", "KO"], vec![vec![0.01, 0.0], vec![0.02, 0.01]]);
        let sel = select_portfolio(&returns, RiskMode::Static, 1).unwrap();
        assert_eq!(sel.tickers, vec!["JNJ", "KO"]);
        assert_eq!(sel.missing, vec!["PG", "WMT", "PEP"]);

        let err = select_portfolio(&returns, RiskMode::Static, 10).unwrap_err();
        assert!(matches!(err, RiskError::InsufficientData(_)));
    }

    #[test]
    fn test_volatility_buckets_order_and_benchmark_exclusion() {
        let calm = vec![0.001, -0.001, 0.001, -0.001];
        let wild = vec![0.05, -0.05, 0.05, -0.05];
        let mid = vec![0.01, -0.01, 0.01, -0.01];
        let returns = returns_table(&["WILD", "SP500", "CALM", "MID"], vec![wild, mid.clone(), calm, mid]);
        let ranking = annualized_volatility_ranking(&returns).unwrap();
        let order: Vec<&str> = ranking.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(order, vec!["CALM", "MID", "WILD"]);

        let sel = select_portfolio(&returns, RiskMode::Volatility, 1).unwrap();
        assert_eq!(sel.tickers, vec!["CALM"]);
        let err = select_portfolio(&returns, RiskMode::Volatility, 9).unwrap_err();
        assert!(matches!(err, RiskError::EmptyBucket(9)));
    }

    #[test]
    fn test_volatility_needs_two_tickers() {
        let returns = returns_table(&["A", "SP500"], vec![vec![0.01, 0.02], vec![0.0, 0.01]]);
        assert!(matches!(
            select_portfolio(&returns, RiskMode::Volatility, 1),
            Err(RiskError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_score_out_of_range() {
        let returns = returns_table(&["A"], vec![vec![0.01]]);
        assert!(select_portfolio(&returns, RiskMode::Static, 0).is_err());
        assert!(select_portfolio(&returns, RiskMode::Static, 11).is_err());
    }
}
