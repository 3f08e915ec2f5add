mod master;
mod normalize;
mod thumbnails;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use master::{render_master, write_master, AudioEntry, ManifestOptions, SubtitleEntry, DEFAULT_CODECS};
pub use normalize::{normalize_in_place, normalize_playlist_text};
pub use thumbnails::{render_thumbnail_vtt, write_thumbnail_vtt};

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl PlaylistError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> PlaylistError + '_ {
        move |source| PlaylistError::Io {
            source,
            path: path.to_path_buf(),
        }
    }
}

pub type PlaylistResult<T> = Result<T, PlaylistError>;
