use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to start prober {path}: {source}")]
    ProbeProcessError {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("prober produced no output (exit code {code:?}): {stderr}")]
    ProbeOutputEmpty { code: Option<i32>, stderr: String },
    #[error("prober output could not be parsed ({reason}, exit code {code:?}): {stderr}")]
    ProbeParseError {
        reason: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("failed to read source while probing: {0}")]
    SourceRead(std::io::Error),
    #[error("prober io error: {0}")]
    Io(#[from] std::io::Error),
}
