use crate::error::{Result, RiskError};
use chrono::NaiveDate;

/// A date-indexed table of named columns sharing one date axis.
///
/// Every column holds exactly one value per date and dates are strictly
/// ascending. Prices and returns use `f64`; rolling statistics use
/// `Option<f64>` so that warm-up rows can be represented as absent.
#[derive(Clone, Debug, PartialEq)]
pub struct DatedTable<T> {
    pub dates: Vec<NaiveDate>,
    pub names: Vec<String>,
    pub columns: Vec<Vec<T>>,
}

/// Closing prices per ticker.
pub type PriceTable = DatedTable<f64>;
/// Simple daily returns per ticker.
pub type ReturnTable = DatedTable<f64>;
/// Rolling volatility per ticker; `None` until the window is filled.
pub type VolatilityTable = DatedTable<Option<f64>>;

impl<T: Clone> DatedTable<T> {
    pub fn new(dates: Vec<NaiveDate>, names: Vec<String>, columns: Vec<Vec<T>>) -> Result<Self> {
        if names.len() != columns.len() {
            return Err(RiskError::InvalidParameter(format!(
                "{} column names for {} columns",
                names.len(),
                columns.len()
            )));
        }
        if let Some((name, col)) = names.iter().zip(&columns).find(|(_, c)| c.len() != dates.len()) {
            return Err(RiskError::InvalidParameter(format!(
                "column {} has {} values for {} dates",
                name,
                col.len(),
                dates.len()
            )));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(RiskError::InvalidParameter(
                "dates must be strictly ascending".to_string(),
            ));
        }
        Ok(Self { dates, names, columns })
    }

    pub fn empty() -> Self {
        Self {
            dates: Vec::new(),
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.columns.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&[T]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.columns[idx].as_slice())
    }

    /// Appends a column, replacing any existing column of the same name.
    pub fn with_column(mut self, name: &str, values: Vec<T>) -> Result<Self> {
        if values.len() != self.dates.len() {
            return Err(RiskError::InvalidParameter(format!(
                "column {} has {} values for {} dates",
                name,
                values.len(),
                self.dates.len()
            )));
        }
        match self.names.iter().position(|n| n == name) {
            Some(idx) => self.columns[idx] = values,
            None => {
                self.names.push(name.to_string());
                self.columns.push(values);
            }
        }
        Ok(self)
    }

    /// Restricts the table to the given columns, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !self.has_column(n))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(RiskError::UnknownTickers(missing));
        }
        let columns = names
            .iter()
            .filter_map(|n| self.column(n).map(|c| c.to_vec()))
            .collect();
        Ok(Self {
            dates: self.dates.clone(),
            names: names.to_vec(),
            columns,
        })
    }

    /// Keeps the rows whose mask entry is `true`.
    pub fn filter_rows(&self, mask: &[bool]) -> Self {
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(i, keep)| **keep && *i < self.dates.len())
            .map(|(i, _)| i)
            .collect();
        Self {
            dates: keep.iter().map(|&i| self.dates[i]).collect(),
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|col| keep.iter().map(|&i| col[i].clone()).collect())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_new_rejects_ragged_columns() {
        let result = DatedTable::new(vec![d(1), d(2)], vec!["A".into()], vec![vec![1.0]]);
        assert!(matches!(result, Err(RiskError::InvalidParameter(_))));
    }

    #[test]
    fn test_new_rejects_unsorted_dates() {
        let result = DatedTable::new(vec![d(2), d(1)], vec!["A".into()], vec![vec![1.0, 2.0]]);
        assert!(result.is_err());
    }

    #[test]
    fn test_with_column_appends_then_replaces() {
        let table = DatedTable::new(vec![d(1), d(2)], vec!["A".into()], vec![vec![1.0, 2.0]]).unwrap();
        let table = table.with_column("P", vec![3.0, 4.0]).unwrap();
        assert_eq!(table.names, vec!["A", "P"]);
        let table = table.with_column("P", vec![5.0, 6.0]).unwrap();
        assert_eq!(table.names.len(), 2);
        assert_eq!(table.column("P").unwrap(), &[5.0, 6.0]);
    }

    #[test]
    fn test_select_unknown_column_lists_missing() {
        let table = DatedTable::new(vec![d(1)], vec!["A".into()], vec![vec![1.0]]).unwrap();
        match table.select(&["A".into(), "ZZZ".into()]) {
            Err(RiskError::UnknownTickers(missing)) => assert_eq!(missing, vec!["ZZZ"]),
            other => panic!("expected UnknownTickers, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_rows_keeps_alignment() {
        let table = DatedTable::new(
            vec![d(1), d(2), d(3)],
            vec!["A".into(), "B".into()],
            vec![vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]],
        )
        .unwrap();
        let filtered = table.filter_rows(&[false, true, true]);
        assert_eq!(filtered.dates, vec![d(2), d(3)]);
        assert_eq!(filtered.column("B").unwrap(), &[20.0, 30.0]);
    }
}
