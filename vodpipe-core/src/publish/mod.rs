mod live;
mod store;
mod sweep;

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::UploadSection;

pub use live::{LiveUploader, UploadStats, UploadTask};
pub use store::{ObjectStore, S3Credentials, S3ObjectStore, StoreError, StoreResult};
pub use sweep::{final_sweep, SweepReport};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to watch {path}: {source}")]
    Watch {
        source: notify::Error,
        path: PathBuf,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("final sweep left {} files unpublished: {}", .failed.len(), .failed.join(", "))]
    SweepIncomplete { failed: Vec<String> },
}

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub concurrency: usize,
    pub max_retries: u32,
    pub busy_retry_delay: Duration,
    pub network_retry_delay: Duration,
    pub stability: Duration,
}

impl From<&UploadSection> for UploadPolicy {
    fn from(section: &UploadSection) -> Self {
        Self {
            concurrency: section.concurrency.max(1),
            max_retries: section.max_retries,
            busy_retry_delay: Duration::from_millis(section.busy_retry_delay_ms),
            network_retry_delay: Duration::from_millis(section.network_retry_delay_ms),
            stability: Duration::from_millis(section.stability_ms),
        }
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from(&UploadSection::default())
    }
}

/// Destination key: `prefix` joined with the path relative to `root`,
/// always with forward slashes.
pub fn remote_key(prefix: &str, root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    let prefix = prefix.replace('\\', "/");
    let prefix = prefix.trim_matches('/');
    let relative = parts.join("/");
    if prefix.is_empty() {
        Some(relative)
    } else {
        Some(format!("{prefix}/{relative}"))
    }
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("m4s") => "video/iso.segment",
        Some("mp4") => "video/mp4",
        Some("vtt") => "text/vtt",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Playlists and init segments are rewritten until the encoder exits, so
/// they stay on disk for the final sweep.
pub fn keep_after_upload(path: &Path) -> bool {
    let is_playlist = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("m3u8"));
    is_playlist || path.file_name().is_some_and(|name| name == "init.mp4")
}

/// True when any component below `root` is a dotfile or dot-directory.
pub fn is_hidden(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| {
        matches!(component, Component::Normal(part) if part.to_string_lossy().starts_with('.'))
    })
}
