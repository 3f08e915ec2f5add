mod context;
mod events;
mod registry;
mod runner;

use std::path::PathBuf;

use thiserror::Error;

use crate::encode::EncodeError;
use crate::error::ConfigError;
use crate::ingest::IngestError;
use crate::playlist::PlaylistError;
use crate::probe::ProbeError;
use crate::publish::{StoreError, UploadError};
use crate::source::SourceError;

pub use context::PipelineContext;
pub use events::{JobEvent, JobStatus};
pub use registry::JobRegistry;
pub use runner::{JobHandle, JobOutcome, JobRequest, JobRunner};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("playlist error: {0}")]
    Playlist(#[from] PlaylistError),
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("catalog ingest failed: {0}")]
    Ingest(#[from] IngestError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("http client error: {0}")]
    Client(String),
}

impl From<reqwest::Error> for JobError {
    fn from(error: reqwest::Error) -> Self {
        JobError::Client(error.to_string())
    }
}

pub type JobResult<T> = Result<T, JobError>;
