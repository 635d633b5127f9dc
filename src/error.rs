//! Error types shared by the fetch, decode and persistence layers.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn a payload into rows. Never worth retrying.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("observation key `{key}` has {found} indices but {expected} dimensions are declared")]
    SchemaMismatch {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("observation key `{key}`: index {index} is out of range for dimension `{dimension}` ({len} values)")]
    IndexOutOfRange {
        key: String,
        dimension: String,
        index: usize,
        len: usize,
    },

    #[error("observation key `{key}`: `{token}` is not a dimension index")]
    InvalidIndex { key: String, token: String },

    #[error("observation key `{key}` has no measurement")]
    EmptyObservation { key: String },

    #[error("payload is missing `{0}`")]
    MissingField(&'static str),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unparseable record: {0}")]
    InvalidRecord(String),
}

/// Failure to obtain a resource over HTTP.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Transport-level failures are retried, payload failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Network(_) | FetchError::Status(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Network(e.to_string()),
        }
    }
}

/// Failure to read or write a persisted table.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("arrow: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("row {row} has {found} cells but the table has {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
