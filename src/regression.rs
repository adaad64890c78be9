use crate::config::MIN_REGRESSION_ROWS;
use crate::error::{Result, RiskError};
use crate::factors::{FactorTable, HML, MKT_RF, RF, SMB};
use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};
use std::collections::HashMap;
use std::fmt::Write;
use tracing::debug;

/// Fitted ordinary least squares model.
#[derive(Clone, Debug)]
pub struct RegressionResult {
    pub dependent: String,
    /// Regressor names; `const` first when an intercept is fitted.
    pub names: Vec<String>,
    pub params: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub t_values: Vec<f64>,
    pub p_values: Vec<f64>,
    pub conf_int: Vec<(f64, f64)>,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub f_statistic: f64,
    pub f_p_value: f64,
    pub n_obs: usize,
    pub df_model: usize,
    pub df_resid: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

impl RegressionResult {
    pub fn param(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.params[i])
    }
}

/// Ordinary least squares of `y` on the columns of `x` plus an intercept.
///
/// `x` is given column-wise, each column the same length as `y`.
pub fn ols(dependent: &str, y: &[f64], regressors: &[(&str, &[f64])]) -> Result<RegressionResult> {
    let n = y.len();
    let k = regressors.len() + 1;
    if regressors.iter().any(|(_, col)| col.len() != n) {
        return Err(RiskError::InvalidParameter(
            "regressor length differs from dependent variable".to_string(),
        ));
    }
    if n <= k {
        return Err(RiskError::InsufficientData(format!(
            "{} observations for {} parameters",
            n, k
        )));
    }

    let x = DMatrix::from_fn(n, k, |row, col| {
        if col == 0 { 1.0 } else { regressors[col - 1].1[row] }
    });
    let yv = DVector::from_column_slice(y);
    let xtx_inv = (x.transpose() * &x)
        .try_inverse()
        .ok_or(RiskError::SingularMatrix)?;
    let beta = &xtx_inv * x.transpose() * &yv;

    let residuals = &yv - &x * &beta;
    let ssr = residuals.norm_squared();
    let mean_y = yv.mean();
    let sst = yv.iter().map(|v| (v - mean_y).powi(2)).sum::<f64>();

    let df_resid = n - k;
    let df_model = k - 1;
    let sigma2 = ssr / df_resid as f64;

    let std_errors: Vec<f64> = (0..k)
        .map(|i| (xtx_inv[(i, i)] * sigma2).max(0.0).sqrt())
        .collect();
    let t_values: Vec<f64> = beta
        .iter()
        .zip(&std_errors)
        .map(|(b, se)| if *se > 0.0 { b / se } else { f64::INFINITY.copysign(*b) })
        .collect();

    let t_dist = StudentsT::new(0.0, 1.0, df_resid as f64).ok();
    let p_values: Vec<f64> = t_values
        .iter()
        .map(|t| match &t_dist {
            Some(dist) if t.is_finite() => 2.0 * (1.0 - dist.cdf(t.abs())),
            Some(_) => 0.0,
            None => f64::NAN,
        })
        .collect();
    let t_crit = t_dist.as_ref().map(|d| d.inverse_cdf(0.975)).unwrap_or(f64::NAN);
    let conf_int = beta
        .iter()
        .zip(&std_errors)
        .map(|(b, se)| (b - t_crit * se, b + t_crit * se))
        .collect();

    let r_squared = if sst > 0.0 { 1.0 - ssr / sst } else { f64::NAN };
    let adj_r_squared = 1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / df_resid as f64;
    let f_statistic = if ssr > 0.0 {
        ((sst - ssr) / df_model as f64) / sigma2
    } else {
        f64::INFINITY
    };
    let f_p_value = match FisherSnedecor::new(df_model as f64, df_resid as f64) {
        Ok(dist) if f_statistic.is_finite() => 1.0 - dist.cdf(f_statistic),
        Ok(_) => 0.0,
        Err(_) => f64::NAN,
    };

    let names = std::iter::once("const".to_string())
        .chain(regressors.iter().map(|(name, _)| name.to_string()))
        .collect();

    debug!("OLS fit: n={}, k={}, R2={:.4}", n, k, r_squared);
    Ok(RegressionResult {
        dependent: dependent.to_string(),
        names,
        params: beta.iter().copied().collect(),
        std_errors,
        t_values,
        p_values,
        conf_int,
        r_squared,
        adj_r_squared,
        f_statistic,
        f_p_value,
        n_obs: n,
        df_model,
        df_resid,
        first_date: None,
        last_date: None,
    })
}

/// Regresses the portfolio's excess return (portfolio - RF) on the three
/// Fama-French factors over the dates both series share.
///
/// Factors are first restricted to the portfolio's date range; the
/// regression is refused when that range holds fewer than
/// `MIN_REGRESSION_ROWS` portfolio returns.
pub fn run_ff3_regression(
    dates: &[NaiveDate],
    portfolio_returns: &[f64],
    factors: &FactorTable,
) -> Result<RegressionResult> {
    if dates.len() != portfolio_returns.len() {
        return Err(RiskError::InvalidParameter(
            "portfolio dates and returns differ in length".to_string(),
        ));
    }
    let (Some(first), Some(last)) = (dates.iter().min().copied(), dates.iter().max().copied()) else {
        return Err(RiskError::InsufficientData(
            "Not enough overlapping data for regression in this time range.".to_string(),
        ));
    };
    let in_range = factors.dates.iter().any(|d| *d >= first && *d <= last);
    if !in_range || dates.len() < MIN_REGRESSION_ROWS {
        return Err(RiskError::InsufficientData(
            "Not enough overlapping data for regression in this time range.".to_string(),
        ));
    }

    let col = |name: &str| {
        factors
            .column(name)
            .ok_or_else(|| RiskError::FactorFormat(format!("missing factor column {}", name)))
    };
    let (mkt, smb, hml, rf) = (col(MKT_RF)?, col(SMB)?, col(HML)?, col(RF)?);
    let factor_index: HashMap<NaiveDate, usize> = factors
        .dates
        .iter()
        .enumerate()
        .map(|(i, d)| (*d, i))
        .collect();

    let mut joined_dates = Vec::new();
    let (mut excess, mut x_mkt, mut x_smb, mut x_hml) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for (date, ret) in dates.iter().zip(portfolio_returns) {
        let Some(&i) = factor_index.get(date) else {
            continue;
        };
        let row = [*ret, mkt[i], smb[i], hml[i], rf[i]];
        if row.iter().any(|v| !v.is_finite()) {
            continue;
        }
        joined_dates.push(*date);
        excess.push(ret - rf[i]);
        x_mkt.push(mkt[i]);
        x_smb.push(smb[i]);
        x_hml.push(hml[i]);
    }
    if excess.is_empty() {
        return Err(RiskError::InsufficientData(
            "Not enough overlapping data for regression.".to_string(),
        ));
    }

    let mut result = ols(
        "Excess",
        &excess,
        &[(MKT_RF, x_mkt.as_slice()), (SMB, x_smb.as_slice()), (HML, x_hml.as_slice())],
    )?;
    result.first_date = joined_dates.first().copied();
    result.last_date = joined_dates.last().copied();
    Ok(result)
}

/// Renders a plain-text summary table of a fitted model.
pub fn summary_text(result: &RegressionResult) -> String {
    let rule = "=".repeat(78);
    let thin = "-".repeat(78);
    let mut out = String::new();
    let span = match (result.first_date, result.last_date) {
        (Some(a), Some(b)) => format!("{} .. {}", a, b),
        _ => "n/a".to_string(),
    };

    let _ = writeln!(out, "{:^78}", "OLS Regression Results");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "Dep. Variable: {:>14}    R-squared:          {:>10.3}",
        result.dependent, result.r_squared
    );
    let _ = writeln!(
        out,
        "Model:         {:>14}    Adj. R-squared:     {:>10.3}",
        "OLS", result.adj_r_squared
    );
    let _ = writeln!(
        out,
        "No. Obs.:      {:>14}    F-statistic:        {:>10.2}",
        result.n_obs, result.f_statistic
    );
    let _ = writeln!(
        out,
        "Df Residuals:  {:>14}    Prob (F-statistic): {:>10.3e}",
        result.df_resid, result.f_p_value
    );
    let _ = writeln!(out, "Df Model:      {:>14}    Sample: {}", result.df_model, span);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "{:<10}{:>11}{:>11}{:>10}{:>10}{:>13}{:>13}",
        "", "coef", "std err", "t", "P>|t|", "[0.025", "0.975]"
    );
    let _ = writeln!(out, "{}", thin);
    for i in 0..result.names.len() {
        let _ = writeln!(
            out,
            "{:<10}{:>11.4}{:>11.4}{:>10.3}{:>10.3}{:>13.4}{:>13.4}",
            result.names[i],
            result.params[i],
            result.std_errors[i],
            result.t_values[i],
            result.p_values[i],
            result.conf_int[i].0,
            result.conf_int[i].1
        );
    }
    let _ = writeln!(out, "{}", rule);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn synthetic_factors(days: usize) -> (Vec<NaiveDate>, FactorTable) {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let dates: Vec<NaiveDate> = (0..days).map(|i| start + chrono::Duration::days(i as i64)).collect();
        let mkt: Vec<f64> = (0..days).map(|i| ((i * 7 % 11) as f64 - 5.0) / 500.0).collect();
        let smb: Vec<f64> = (0..days).map(|i| ((i * 3 % 7) as f64 - 3.0) / 700.0).collect();
        let hml: Vec<f64> = (0..days).map(|i| ((i * 5 % 13) as f64 - 6.0) / 900.0).collect();
        let rf = vec![0.0001; days];
        let table = FactorTable::new(
            dates.clone(),
            vec![MKT_RF.into(), SMB.into(), HML.into(), RF.into()],
            vec![mkt, smb, hml, rf],
        )
        .unwrap();
        (dates, table)
    }

    #[test]
    fn test_ols_recovers_exact_coefficients() {
        let x1: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let x2: Vec<f64> = (0..20).map(|i| ((i * i) % 7) as f64).collect();
        let y: Vec<f64> = x1.iter().zip(&x2).map(|(a, b)| 1.5 + 2.0 * a - 0.5 * b).collect();
        let fit = ols("y", &y, &[("x1", &x1[..]), ("x2", &x2[..])]).unwrap();
        assert_abs_diff_eq!(fit.param("const").unwrap(), 1.5, epsilon = 1e-8);
        assert_abs_diff_eq!(fit.param("x1").unwrap(), 2.0, epsilon = 1e-8);
        assert_abs_diff_eq!(fit.param("x2").unwrap(), -0.5, epsilon = 1e-8);
        assert_abs_diff_eq!(fit.r_squared, 1.0, epsilon = 1e-10);
        assert_eq!(fit.df_resid, 17);
    }

    #[test]
    fn test_ols_simple_regression_statistics() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.1, 5.9, 8.2, 9.8];
        let fit = ols("y", &y, &[("x", &x[..])]).unwrap();
        // Closed form: slope = Sxy / Sxx = 19.7 / 10
        assert_abs_diff_eq!(fit.param("x").unwrap(), 1.97, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.param("const").unwrap(), 6.0 - 1.97 * 3.0, epsilon = 1e-10);
        assert!(fit.r_squared > 0.99 && fit.r_squared < 1.0);
        assert!(fit.p_values[1] < 0.001);
        let (lo, hi) = fit.conf_int[1];
        assert!(lo < 1.97 && 1.97 < hi);
        // For one regressor F equals t squared.
        assert_abs_diff_eq!(fit.f_statistic, fit.t_values[1].powi(2), epsilon = 1e-6);
    }

    #[test]
    fn test_singular_design_is_reported() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v * 3.0).collect();
        let result = ols("y", &y, &[("a", &x[..]), ("b", &x[..])]);
        assert!(matches!(result, Err(RiskError::SingularMatrix)));
    }

    #[test]
    fn test_too_few_observations() {
        let result = ols("y", &[1.0, 2.0], &[("x", &[1.0, 3.0][..])]);
        assert!(matches!(result, Err(RiskError::InsufficientData(_))));
    }

    #[test]
    fn test_ff3_regression_on_excess_returns() {
        let (dates, factors) = synthetic_factors(60);
        let mkt = factors.column(MKT_RF).unwrap();
        let smb = factors.column(SMB).unwrap();
        let hml = factors.column(HML).unwrap();
        let portfolio: Vec<f64> = (0..60)
            .map(|i| 0.0001 + 0.0002 + 1.1 * mkt[i] + 0.3 * smb[i] - 0.2 * hml[i])
            .collect();
        let fit = run_ff3_regression(&dates, &portfolio, &factors).unwrap();
        assert_eq!(fit.names, vec!["const", "Mkt-RF", "SMB", "HML"]);
        assert_abs_diff_eq!(fit.param("const").unwrap(), 0.0002, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.param("Mkt-RF").unwrap(), 1.1, epsilon = 1e-8);
        assert_abs_diff_eq!(fit.param("SMB").unwrap(), 0.3, epsilon = 1e-8);
        assert_abs_diff_eq!(fit.param("HML").unwrap(), -0.2, epsilon = 1e-8);
        assert_eq!(fit.n_obs, 60);
        assert!(summary_text(&fit).contains("Mkt-RF"));
    }

    #[test]
    fn test_ff3_regression_uses_only_shared_dates() {
        let (dates, factors) = synthetic_factors(60);
        let later: Vec<NaiveDate> = dates.iter().map(|d| *d + chrono::Duration::days(20)).collect();
        let portfolio = vec![0.001; 60];
        let fit = run_ff3_regression(&later, &portfolio, &factors);
        // 40 shared dates; constant excess return still fits.
        assert_eq!(fit.map(|f| f.n_obs).ok(), Some(40));
    }

    #[test]
    fn test_ff3_regression_guards() {
        let (dates, factors) = synthetic_factors(60);
        let short = run_ff3_regression(&dates[..10], &[0.01; 10], &factors);
        assert!(matches!(short, Err(RiskError::InsufficientData(ref m)) if m.contains("time range")));

        let disjoint: Vec<NaiveDate> = dates.iter().map(|d| *d + chrono::Duration::days(400)).collect();
        let none = run_ff3_regression(&disjoint, &[0.01; 60], &factors);
        assert!(none.is_err());
    }
}
