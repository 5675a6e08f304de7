// src/error.rs

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use std::{io, path::PathBuf};
use thiserror::Error;

/// Why a source CSV could not be turned into a record batch.
#[derive(Debug, Error)]
pub enum ReadFailure {
    #[error("file not found: {0}")]
    Missing(#[source] io::Error),

    #[error("i/o error: {0}")]
    Io(#[source] io::Error),

    #[error("malformed csv: {0}")]
    Malformed(#[source] ArrowError),
}

impl ReadFailure {
    pub fn from_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            ReadFailure::Missing(err)
        } else {
            ReadFailure::Io(err)
        }
    }

    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ReadFailure::Missing(_) => "missing",
            ReadFailure::Io(_) => "io",
            ReadFailure::Malformed(_) => "malformed",
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("source {} unavailable after fetch and retry: {failure}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        failure: ReadFailure,
    },

    #[error("filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("writing snapshot {}: {source}", .path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: ParquetError,
    },

    #[error("column {column}: {failures} value(s) are not epoch seconds")]
    Coercion { column: String, failures: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

impl FeedError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FeedError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
