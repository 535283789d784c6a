use thiserror::Error;

use crate::process::RunStats;

/// Everything the engine, its codecs and its collaborators can fail with.
///
/// `import`/`export` only ever return [`DataError::Processing`]; the other
/// variants appear as its source (see [`DataError::root`]).
#[derive(Error, Debug)]
pub enum DataError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation failed on row {row}: {message}")]
    Validation { row: u64, message: String },

    #[error("row {row} failed: {source}")]
    Row {
        row: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("maximum error count reached: {max}")]
    ErrorBudgetExceeded {
        max: u64,
        #[source]
        source: Box<DataError>,
    },

    #[error("processing failed: {source}")]
    Processing {
        stats: RunStats,
        #[source]
        source: Box<DataError>,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DataError {
    pub fn config(msg: impl Into<String>) -> Self {
        DataError::Configuration(msg.into())
    }

    pub(crate) fn row(row: u64, source: anyhow::Error) -> Self {
        DataError::Row { row, source }
    }

    /// Innermost engine error, skipping `Processing` and budget wrappers.
    pub fn root(&self) -> &DataError {
        match self {
            DataError::Processing { source, .. } | DataError::ErrorBudgetExceeded { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    /// True when the run stopped because too many rows failed, as opposed to
    /// a single fatal row.
    pub fn is_budget_exceeded(&self) -> bool {
        match self {
            DataError::ErrorBudgetExceeded { .. } => true,
            DataError::Processing { source, .. } => source.is_budget_exceeded(),
            _ => false,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), DataError::Configuration(_))
    }

    /// Stats captured when a run failed.
    pub fn stats(&self) -> Option<&RunStats> {
        match self {
            DataError::Processing { stats, .. } => Some(stats),
            _ => None,
        }
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, DataError>;
