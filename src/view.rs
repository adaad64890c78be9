use crate::analysis::{
    StdDev, calculate_cumulative_return, calculate_returns, calculate_volatility, cumulative_product,
    rolling_std,
};
use crate::config::{PORTFOLIO_SERIES, ROLLING_VOL_CHOICES};
use crate::error::{Result, RiskError};
use crate::factors::FactorTable;
use crate::horizon::{TimeRange, date_mask};
use crate::portfolio::{PortfolioSelection, RiskMode, equal_weight_portfolio, select_portfolio};
use crate::profiles::{SummaryRow, build_summary_table};
use crate::regression::{RegressionResult, run_ff3_regression};
use crate::table::{PriceTable, ReturnTable, VolatilityTable};
use tracing::{debug, warn};

/// User-facing knobs of the analysis tab.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisParams {
    pub range: TimeRange,
    pub window: usize,
    pub score: u8,
    pub mode: RiskMode,
    /// Series to plot; any loaded ticker or `RiskPortfolio`.
    pub series: Vec<String>,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            range: TimeRange::Max,
            window: ROLLING_VOL_CHOICES[0].1,
            score: 5,
            mode: RiskMode::Static,
            series: vec![PORTFOLIO_SERIES.to_string()],
        }
    }
}

/// Menu label for a rolling window, e.g. `Weekly (5 trading days)`.
pub fn window_label(window: usize) -> String {
    ROLLING_VOL_CHOICES
        .iter()
        .find(|(_, w)| *w == window)
        .map(|(label, _)| label.to_string())
        .unwrap_or_else(|| format!("{} trading days", window))
}

/// Next preset window after `window`, wrapping around.
pub fn next_window(window: usize) -> usize {
    let idx = ROLLING_VOL_CHOICES
        .iter()
        .position(|(_, w)| *w == window)
        .map(|i| (i + 1) % ROLLING_VOL_CHOICES.len())
        .unwrap_or(0);
    ROLLING_VOL_CHOICES[idx].1
}

/// Everything the analysis tab draws for one parameter set.
#[derive(Clone, Debug)]
pub struct AnalysisView {
    pub params: AnalysisParams,
    pub selection: PortfolioSelection,
    /// Ticker returns plus the `RiskPortfolio` column.
    pub returns: ReturnTable,
    pub cumulative: ReturnTable,
    pub volatility: VolatilityTable,
    pub regression: std::result::Result<RegressionResult, String>,
    pub warnings: Vec<String>,
}

impl AnalysisView {
    /// Header line: the basket, then any extra plotted series.
    pub fn title(&self) -> String {
        let extras: Vec<&str> = self
            .params
            .series
            .iter()
            .filter(|s| s.as_str() != PORTFOLIO_SERIES)
            .map(String::as_str)
            .collect();
        let base = if self.selection.tickers.is_empty() {
            "(none)".to_string()
        } else {
            self.selection.tickers.join(", ")
        };
        if extras.is_empty() {
            format!("Risk Score {}: {}", self.params.score, base)
        } else {
            format!("Risk Score {}: {} + {}", self.params.score, base, extras.join(", "))
        }
    }

    /// Requested series that actually exist in the view.
    pub fn plotted_series(&self) -> Vec<String> {
        self.params
            .series
            .iter()
            .filter(|s| self.returns.has_column(s))
            .cloned()
            .collect()
    }
}

/// Strips the variant prefix so panels show the bare sentence.
pub fn user_message(err: &RiskError) -> String {
    match err {
        RiskError::InsufficientData(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// Builds the analysis tab from the full price table.
///
/// Fails only on the conditions that blank the whole tab: fewer than two
/// rows in range or no usable portfolio. A missing or short factor table
/// lands in `regression` as a message instead.
pub fn build_analysis(
    prices_full: &PriceTable,
    factors: Option<&FactorTable>,
    params: &AnalysisParams,
) -> Result<AnalysisView> {
    let mask = date_mask(&prices_full.dates, params.range);
    let prices = prices_full.filter_rows(&mask);
    if prices.len() < 2 {
        return Err(RiskError::InsufficientData(
            "Not enough data in the selected time range.".to_string(),
        ));
    }

    let returns = calculate_returns(&prices);
    let cumulative = calculate_cumulative_return(&returns);
    let volatility = calculate_volatility(&returns, params.window)?;

    let selection = select_portfolio(&returns, params.mode, params.score)?;
    let mut warnings = Vec::new();
    if !selection.missing.is_empty() {
        warnings.push(format!(
            "Missing data for: {} - they will be skipped.",
            selection.missing.join(", ")
        ));
    }

    let portfolio = equal_weight_portfolio(&returns, &selection.tickers)?;
    let portfolio_vol = rolling_std(&portfolio, params.window, StdDev::Sample);
    let portfolio_cum = cumulative_product(&portfolio);

    let regression = match factors {
        None => Err("Fama-French factors are unavailable.".to_string()),
        Some(ff3) => run_ff3_regression(&returns.dates, &portfolio, ff3).map_err(|e| {
            let msg = user_message(&e);
            warn!("Regression skipped: {}", msg);
            msg
        }),
    };

    let returns = returns.with_column(PORTFOLIO_SERIES, portfolio)?;
    let volatility = volatility.with_column(PORTFOLIO_SERIES, portfolio_vol)?;
    let cumulative = cumulative.with_column(PORTFOLIO_SERIES, portfolio_cum)?;

    if params.series.is_empty() {
        warnings.push("No portfolios selected to plot.".to_string());
    }

    debug!(
        "Analysis rebuilt: range={}, window={}, score={}, mode={}, rows={}",
        params.range,
        params.window,
        params.score,
        params.mode.label(),
        returns.len()
    );

    Ok(AnalysisView {
        params: params.clone(),
        selection,
        returns,
        cumulative,
        volatility,
        regression,
        warnings,
    })
}

/// Profile rows over the profile tab's own horizon.
pub fn build_profiles(prices_full: &PriceTable, range: TimeRange) -> Vec<SummaryRow> {
    let mask = date_mask(&prices_full.dates, range);
    build_summary_table(&prices_full.filter_rows(&mask), range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{HML, MKT_RF, RF, SMB};
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;

    fn static_prices(days: usize) -> PriceTable {
        // Basket 5 minus GOOG, which is reported missing.
        crate::data::new_mock(&["AAPL", "AMZN", "META", "MSFT", "SP500"], days)
    }

    #[test]
    fn test_portfolio_column_is_appended_everywhere() {
        let prices = static_prices(80);
        let view = build_analysis(&prices, None, &AnalysisParams::default()).unwrap();

        assert_eq!(view.returns.len(), 79);
        assert!(view.returns.has_column(PORTFOLIO_SERIES));
        assert!(view.cumulative.has_column(PORTFOLIO_SERIES));
        assert!(view.volatility.has_column(PORTFOLIO_SERIES));
        assert_eq!(view.selection.missing, vec!["GOOG".to_string()]);
        assert!(view.warnings[0].contains("GOOG"));
        assert_eq!(view.regression.as_ref().unwrap_err(), "Fama-French factors are unavailable.");

        let port = view.returns.column(PORTFOLIO_SERIES).unwrap();
        let mean: f64 = ["AAPL", "AMZN", "META", "MSFT"]
            .iter()
            .map(|t| view.returns.column(t).unwrap()[10])
            .sum::<f64>()
            / 4.0;
        assert_abs_diff_eq!(port[10], mean, epsilon = 1e-12);

        let vol = view.volatility.column(PORTFOLIO_SERIES).unwrap();
        assert!(vol[3].is_none(), "weekly window warms up over 5 rows");
        assert!(vol[4].is_some());
    }

    #[test]
    fn test_short_range_blanks_the_tab() {
        let prices = static_prices(1);
        let err = build_analysis(&prices, None, &AnalysisParams::default()).unwrap_err();
        assert_eq!(user_message(&err), "Not enough data in the selected time range.");
    }

    #[test]
    fn test_regression_runs_against_factors() {
        let prices = static_prices(60);
        let factor_dates: Vec<NaiveDate> = prices.dates.clone();
        let n = factor_dates.len();
        let wave = |k: f64| (0..n).map(|i| ((i as f64) * k).sin() * 0.01).collect::<Vec<f64>>();
        let factors = FactorTable::new(
            factor_dates,
            vec![MKT_RF.into(), SMB.into(), HML.into(), RF.into()],
            vec![wave(0.7), wave(1.3), wave(2.1), vec![0.0001; n]],
        )
        .unwrap();

        let view = build_analysis(&prices, Some(&factors), &AnalysisParams::default()).unwrap();
        let reg = view.regression.as_ref().unwrap();
        assert_eq!(reg.n_obs, 59);
        assert_eq!(reg.names[0], "const");

        let params = AnalysisParams {
            range: TimeRange::OneYear,
            ..AnalysisParams::default()
        };
        let short = static_prices(20);
        let view = build_analysis(&short, Some(&factors), &params).unwrap();
        assert_eq!(
            view.regression.unwrap_err(),
            "Not enough overlapping data for regression in this time range."
        );
    }

    #[test]
    fn test_empty_series_selection_warns() {
        let params = AnalysisParams {
            series: Vec::new(),
            ..AnalysisParams::default()
        };
        let view = build_analysis(&static_prices(30), None, &params).unwrap();
        assert!(view.warnings.iter().any(|w| w == "No portfolios selected to plot."));
        assert!(view.plotted_series().is_empty());
    }

    #[test]
    fn test_title_lists_extras() {
        let params = AnalysisParams {
            series: vec![PORTFOLIO_SERIES.to_string(), "SP500".to_string()],
            ..AnalysisParams::default()
        };
        let view = build_analysis(&static_prices(30), None, &params).unwrap();
        assert_eq!(view.title(), "Risk Score 5: AAPL, MSFT, AMZN, META + SP500");
        assert_eq!(view.plotted_series().len(), 2);
    }

    #[test]
    fn test_window_cycle_and_labels() {
        assert_eq!(next_window(5), 21);
        assert_eq!(next_window(63), 5);
        assert_eq!(next_window(7), 5);
        assert_eq!(window_label(21), "Monthly (21 trading days)");
    }
}
