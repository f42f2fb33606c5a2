//! Error taxonomy for a synchronisation run.

use std::path::PathBuf;

use thiserror::Error;

use crate::time_unit::Granularity;

/// Errors that can abort a run or be reported for a single item.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "no previous {0} data in the raster table; the first sync must have a period set explicitly"
    )]
    EmptyHistory(Granularity),

    #[error("`{0}` is not available on the remote archive")]
    TransportNotFound(String),

    #[error("failed to fetch `{item}`: {reason}")]
    Transport { item: String, reason: String },

    #[error("artifact name `{0}` does not match the expected file pattern")]
    IngestFormat(String),

    #[error("failed to decode `{path}`: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("invalid basin boundary: {0}")]
    Boundary(String),

    #[error("failed to build aggregation worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("aggregation stage aborted: {0}")]
    Aborted(#[from] tokio::task::JoinError),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("failed to export basin series: {0}")]
    Export(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
