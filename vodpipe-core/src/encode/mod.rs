mod builder;
mod executor;
mod subtitles;

use std::path::PathBuf;

use thiserror::Error;

pub use builder::{
    filter_graph, gop_length, working_frame_rate, AudioSelection, EncodeCommand, EncodeJobBuilder,
    EncodeJobSpec, EncoderProfile, SubtitleSelection, SubtitleSource, GOP_MAX, GOP_MIN,
};
pub use executor::{exit_code, normalize_exit_code, EncodeExecutor};
pub use subtitles::{detect_subtitle_charset, LEGACY_SUBTITLE_CHARSET};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to start encoder {path}: {source}")]
    EncodeSpawnFailed {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("encoder failed with code {code}: {stderr_tail}")]
    EncodeProcessFailed { code: i64, stderr_tail: String },
    #[error("more than one {kind} track writes to {lang}")]
    DuplicateTrack { kind: &'static str, lang: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type EncodeResult<T> = Result<T, EncodeError>;
