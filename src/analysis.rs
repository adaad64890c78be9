use crate::error::{Result, RiskError};
use crate::table::{PriceTable, ReturnTable, VolatilityTable};

/// Degrees-of-freedom convention for standard deviations.
///
/// Rolling-window volatility uses `Sample` (divisor n - 1); the per-ticker
/// profile statistics use `Population` (divisor n). Call sites pick one
/// explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StdDev {
    Population,
    Sample,
}

impl StdDev {
    pub fn ddof(self) -> usize {
        match self {
            Self::Population => 0,
            Self::Sample => 1,
        }
    }
}

/// Standard deviation of `values`, or `None` when there are not more than
/// `ddof` observations.
pub fn std_dev(values: &[f64], kind: StdDev) -> Option<f64> {
    let n = values.len();
    if n <= kind.ddof() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let ss = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    Some((ss / (n - kind.ddof()) as f64).sqrt())
}

/// Simple percent change between consecutive values. The output has one
/// fewer element than the input.
pub fn pct_change(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Running product of `1 + r`.
pub fn cumulative_product(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0, |acc, r| {
            *acc *= 1.0 + r;
            Some(*acc)
        })
        .collect()
}

/// Trailing-window standard deviation; `None` for the first `window - 1` rows.
pub fn rolling_std(values: &[f64], window: usize, kind: StdDev) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                None
            } else {
                std_dev(&values[i + 1 - window..=i], kind)
            }
        })
        .collect()
}

/// Daily returns of every column; the first (undefined) row is dropped.
pub fn calculate_returns(prices: &PriceTable) -> ReturnTable {
    if prices.len() < 2 {
        return ReturnTable {
            dates: Vec::new(),
            names: prices.names.clone(),
            columns: vec![Vec::new(); prices.names.len()],
        };
    }
    ReturnTable {
        dates: prices.dates[1..].to_vec(),
        names: prices.names.clone(),
        columns: prices.columns.iter().map(|c| pct_change(c)).collect(),
    }
}

/// Compounded growth of one unit per column.
///
/// No baseline row is prepended, so each series starts at `1 + r[0]`.
pub fn calculate_cumulative_return(returns: &ReturnTable) -> ReturnTable {
    ReturnTable {
        dates: returns.dates.clone(),
        names: returns.names.clone(),
        columns: returns.columns.iter().map(|c| cumulative_product(c)).collect(),
    }
}

/// Rolling sample volatility of every return column.
pub fn calculate_volatility(returns: &ReturnTable, window: usize) -> Result<VolatilityTable> {
    calculate_volatility_with(returns, window, StdDev::Sample)
}

pub fn calculate_volatility_with(
    returns: &ReturnTable,
    window: usize,
    kind: StdDev,
) -> Result<VolatilityTable> {
    if window == 0 {
        return Err(RiskError::InvalidParameter(
            "rolling window must be at least 1".to_string(),
        ));
    }
    Ok(VolatilityTable {
        dates: returns.dates.clone(),
        names: returns.names.clone(),
        columns: returns
            .columns
            .iter()
            .map(|c| rolling_std(c, window, kind))
            .collect(),
    })
}
