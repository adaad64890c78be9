use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{file} has no '{column}' column.")]
    MissingColumn { file: String, column: String },

    #[error("{file}: unparseable date '{value}' on line {line}")]
    InvalidDate { file: String, line: u64, value: String },

    #[error("No data for requested ticker(s): {}", .0.join(", "))]
    UnknownTickers(Vec<String>),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Risk bucket {0} is empty. Try a different time range.")]
    EmptyBucket(u8),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Malformed factor data: {0}")]
    FactorFormat(String),

    #[error("Regression design matrix is singular")]
    SingularMatrix,
}

pub type Result<T> = std::result::Result<T, RiskError>;
