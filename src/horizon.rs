use chrono::{Datelike, Months, NaiveDate};
use clap::ValueEnum;

/// Time-range presets used to scope charts and statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TimeRange {
    #[value(name = "YTD", alias = "ytd")]
    Ytd,
    #[value(name = "3M", alias = "3m")]
    ThreeMonths,
    #[value(name = "6M", alias = "6m")]
    SixMonths,
    #[value(name = "1Y", alias = "1y")]
    OneYear,
    #[value(name = "3Y", alias = "3y")]
    ThreeYears,
    #[value(name = "Max", alias = "max")]
    Max,
}

impl TimeRange {
    pub const ALL: [TimeRange; 6] = [
        Self::Ytd,
        Self::ThreeMonths,
        Self::SixMonths,
        Self::OneYear,
        Self::ThreeYears,
        Self::Max,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Ytd => "YTD",
            Self::ThreeMonths => "3M",
            Self::SixMonths => "6M",
            Self::OneYear => "1Y",
            Self::ThreeYears => "3Y",
            Self::Max => "Max",
        }
    }

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|r| *r == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    /// First date included in the range ending at `end`. Month arithmetic
    /// clamps to the last day of the target month (Mar 31 - 3M = Dec 31,
    /// May 31 - 3M = Feb 29 in a leap year).
    pub fn start_date(self, first: NaiveDate, end: NaiveDate) -> NaiveDate {
        let months_back = |m: u32| end.checked_sub_months(Months::new(m)).unwrap_or(first);
        match self {
            Self::Max => first,
            Self::Ytd => NaiveDate::from_ymd_opt(end.year(), 1, 1).unwrap_or(first),
            Self::ThreeMonths => months_back(3),
            Self::SixMonths => months_back(6),
            Self::OneYear => months_back(12),
            Self::ThreeYears => months_back(36),
        }
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Boolean mask selecting the dates that fall inside `range`, measured back
/// from the latest date in `dates`.
pub fn date_mask(dates: &[NaiveDate], range: TimeRange) -> Vec<bool> {
    let (Some(first), Some(end)) = (dates.iter().min().copied(), dates.iter().max().copied()) else {
        return Vec::new();
    };
    let start = range.start_date(first, end);
    dates.iter().map(|d| *d >= start && *d <= end).collect()
}
