use crate::analysis::{StdDev, pct_change, std_dev};
use crate::config::TRADING_DAYS;
use crate::horizon::{TimeRange, date_mask};
use crate::table::PriceTable;
use chrono::NaiveDate;
use rayon::prelude::*;

/// One row of the stock profile table. `None` renders as `N/A`.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryRow {
    pub ticker: String,
    pub last_price: Option<f64>,
    pub as_of: Option<NaiveDate>,
    pub horizon_return: Option<f64>,
    pub annualized_vol: Option<f64>,
    pub max_drawdown: Option<f64>,
}

/// Last price over first price, minus one.
pub fn horizon_return(prices: &[f64]) -> Option<f64> {
    if prices.len() < 2 {
        return None;
    }
    Some(prices[prices.len() - 1] / prices[0] - 1.0)
}

/// Population standard deviation of daily returns, scaled by sqrt(252).
pub fn annualized_volatility(prices: &[f64]) -> Option<f64> {
    let returns = pct_change(prices);
    if returns.is_empty() {
        return None;
    }
    std_dev(&returns, StdDev::Population).map(|sd| sd * TRADING_DAYS.sqrt())
}

/// Minimum of `price / running_max - 1`; always `<= 0`.
pub fn max_drawdown(prices: &[f64]) -> Option<f64> {
    let mut running_max = f64::NEG_INFINITY;
    let mut worst: Option<f64> = None;
    for &p in prices.iter().filter(|p| p.is_finite()) {
        running_max = running_max.max(p);
        let dd = p / running_max - 1.0;
        worst = Some(worst.map_or(dd, |w: f64| w.min(dd)));
    }
    worst
}

fn summarize(ticker: &str, dates: &[NaiveDate], prices: &[f64], range: TimeRange) -> SummaryRow {
    let points: Vec<(NaiveDate, f64)> = dates
        .iter()
        .copied()
        .zip(prices.iter().copied())
        .filter(|(_, p)| p.is_finite())
        .collect();
    let Some(&(last_date, last_price)) = points.last() else {
        return SummaryRow {
            ticker: ticker.to_string(),
            last_price: None,
            as_of: None,
            horizon_return: None,
            annualized_vol: None,
            max_drawdown: None,
        };
    };

    let point_dates: Vec<NaiveDate> = points.iter().map(|(d, _)| *d).collect();
    let mask = date_mask(&point_dates, range);
    let window: Vec<(NaiveDate, f64)> = points
        .iter()
        .zip(mask)
        .filter(|(_, keep)| *keep)
        .map(|(pt, _)| *pt)
        .collect();

    if window.len() < 2 {
        return SummaryRow {
            ticker: ticker.to_string(),
            last_price: Some(last_price),
            as_of: Some(last_date),
            horizon_return: None,
            annualized_vol: None,
            max_drawdown: None,
        };
    }

    let values: Vec<f64> = window.iter().map(|(_, p)| *p).collect();
    let (as_of, last) = window[window.len() - 1];
    SummaryRow {
        ticker: ticker.to_string(),
        last_price: Some(last),
        as_of: Some(as_of),
        horizon_return: horizon_return(&values),
        annualized_vol: annualized_volatility(&values),
        max_drawdown: max_drawdown(&values),
    }
}

/// One summary row per ticker for the chosen horizon, in column order.
pub fn build_summary_table(prices: &PriceTable, range: TimeRange) -> Vec<SummaryRow> {
    prices
        .names
        .par_iter()
        .zip(prices.columns.par_iter())
        .map(|(name, col)| summarize(name, &prices.dates, col, range))
        .collect()
}

pub fn fmt_pct(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.2}%", v * 100.0),
        _ => "N/A".to_string(),
    }
}

/// Two decimals with thousands separators, e.g. `1,234.56`.
pub fn fmt_num(value: Option<f64>) -> String {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return "N/A".to_string();
    };
    let fixed = format!("{:.2}", v.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if v < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac)
}

pub fn fmt_date(value: Option<NaiveDate>) -> String {
    value
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_max_drawdown_example() {
        assert_abs_diff_eq!(max_drawdown(&[100.0, 110.0, 99.0]).unwrap(), -0.10, epsilon = 1e-12);
    }

    #[test]
    fn test_max_drawdown_zero_only_when_non_decreasing() {
        assert_eq!(max_drawdown(&[1.0, 1.0, 2.0, 3.5]), Some(0.0));
        assert!(max_drawdown(&[1.0, 2.0, 1.999]).unwrap() < 0.0);

        let table = crate::data::new_mock(&["A", "B", "C"], 120);
        for col in &table.columns {
            assert!(max_drawdown(col).unwrap() <= 0.0);
        }
        assert_eq!(max_drawdown(&[]), None);
    }

    #[test]
    fn test_horizon_return_and_annualized_vol() {
        assert_abs_diff_eq!(horizon_return(&[100.0, 110.0, 99.0]).unwrap(), -0.01, epsilon = 1e-12);
        assert_eq!(horizon_return(&[100.0]), None);

        // returns +10%, -10%: population std is 0.10
        let vol = annualized_volatility(&[100.0, 110.0, 99.0]).unwrap();
        assert_abs_diff_eq!(vol, 0.10 * 252f64.sqrt(), epsilon = 1e-12);
        assert_eq!(annualized_volatility(&[100.0]), None);
    }

    #[test]
    fn test_summary_table_horizon_and_short_series() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates: Vec<NaiveDate> = (0..200).map(|i| start + chrono::Duration::days(i)).collect();
        let rising: Vec<f64> = (0..200).map(|i| 100.0 + i as f64).collect();
        let table = PriceTable::new(dates.clone(), vec!["UP".into()], vec![rising]).unwrap();

        let rows = build_summary_table(&table, TimeRange::ThreeMonths);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.as_of, dates.last().copied());
        assert_eq!(row.last_price, Some(299.0));
        assert_eq!(row.max_drawdown, Some(0.0));
        // 3M back from 2024-07-18 is 2024-04-18, index 108 -> price 208
        assert_abs_diff_eq!(row.horizon_return.unwrap(), 299.0 / 208.0 - 1.0, epsilon = 1e-12);

        let single = PriceTable::new(vec![start], vec!["ONE".into()], vec![vec![42.0]]).unwrap();
        let rows = build_summary_table(&single, TimeRange::Max);
        assert_eq!(rows[0].last_price, Some(42.0));
        assert_eq!(rows[0].horizon_return, None);
        assert_eq!(fmt_pct(rows[0].annualized_vol), "N/A");
    }

    #[test]
    fn test_formatting() {
        assert_eq!(fmt_num(Some(1234.567)), "1,234.57");
        assert_eq!(fmt_num(Some(999.0)), "999.00");
        assert_eq!(fmt_num(Some(-1234567.0)), "-1,234,567.00");
        assert_eq!(fmt_num(None), "N/A");
        assert_eq!(fmt_pct(Some(-0.1)), "-10.00%");
        assert_eq!(fmt_pct(Some(f64::NAN)), "N/A");
        assert_eq!(fmt_date(NaiveDate::from_ymd_opt(2024, 5, 1)), "2024-05-01");
    }
}
