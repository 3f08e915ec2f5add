use thiserror::Error;

use super::torrent::TorrentError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unsupported protocol for {0} (only http, https or magnet)")]
    UnsupportedProtocol(String),
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("redirect from {url} (HTTP {status}) without Location header")]
    RedirectWithoutLocation { url: String, status: u16 },
    #[error("too many redirects (max {max}) starting at {url}")]
    TooManyRedirects { url: String, max: u32 },
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("request to {url} timed out")]
    RequestTimeout { url: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("magnet link has no btih info hash: {0}")]
    MissingInfoHash(String),
    #[error("no torrent engine configured for magnet sources")]
    TorrentEngineUnavailable,
    #[error("timed out after {seconds}s waiting for torrent {info_hash} metadata")]
    MetadataTimeout { info_hash: String, seconds: u64 },
    #[error("torrent {info_hash} has metadata but no files")]
    EmptyTorrent { info_hash: String },
    #[error("no video file found in torrent {info_hash}")]
    NoVideoFileFound { info_hash: String },
    #[error("torrent error: {0}")]
    Torrent(#[from] TorrentError),
}

impl From<reqwest::Error> for SourceError {
    fn from(error: reqwest::Error) -> Self {
        SourceError::Network(error.to_string())
    }
}

pub type SourceResult<T> = Result<T, SourceError>;
