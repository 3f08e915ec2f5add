mod error;
mod http;
pub mod torrent;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use url::Url;

use crate::config::SourceSection;

pub use error::{SourceError, SourceResult};
pub use http::HttpSource;
pub use torrent::{
    MagnetLink, TorrentEngine, TorrentError, TorrentFile, TorrentRegistry, TorrentResource,
    TorrentStats, VIDEO_EXTENSIONS,
};

pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// An opened source byte stream. Dropping it closes the underlying
/// connection or torrent file reader.
pub struct SourceHandle {
    reader: ByteStream,
    content_length: Option<u64>,
    file_name: Option<String>,
}

impl SourceHandle {
    pub fn new(reader: ByteStream) -> Self {
        Self {
            reader,
            content_length: None,
            file_name: None,
        }
    }

    pub fn with_content_length(mut self, length: Option<u64>) -> Self {
        self.content_length = length;
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn reader(&mut self) -> &mut ByteStream {
        &mut self.reader
    }

    pub fn into_reader(self) -> ByteStream {
        self.reader
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("content_length", &self.content_length)
            .field("file_name", &self.file_name)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Http(Url),
    Magnet(MagnetLink),
}

impl SourceLocator {
    pub fn parse(locator: &str) -> SourceResult<Self> {
        let trimmed = locator.trim();
        if trimmed.starts_with("magnet:") {
            return MagnetLink::parse(trimmed).map(SourceLocator::Magnet);
        }
        if trimmed.starts_with("http") {
            let url = Url::parse(trimmed).map_err(|err| SourceError::InvalidUrl {
                url: trimmed.to_string(),
                reason: err.to_string(),
            })?;
            if matches!(url.scheme(), "http" | "https") {
                return Ok(SourceLocator::Http(url));
            }
        }
        Err(SourceError::UnsupportedProtocol(trimmed.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub max_redirects: u32,
}

impl OpenOptions {
    pub fn from_section(section: &SourceSection) -> Self {
        Self {
            headers: Vec::new(),
            timeout: section.timeout(),
            max_redirects: section.max_redirects,
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::from_section(&SourceSection::default())
    }
}

/// Opens HTTP(S) and magnet locators behind one contract. Every call opens
/// a fresh stream; nothing is shared between two opens of the same URL.
#[derive(Clone)]
pub struct SourceAcquirer {
    http: HttpSource,
    torrents: Option<Arc<TorrentRegistry>>,
}

impl SourceAcquirer {
    pub fn new(http: HttpSource, torrents: Option<Arc<TorrentRegistry>>) -> Self {
        Self { http, torrents }
    }

    pub async fn open(&self, locator: &str, options: &OpenOptions) -> SourceResult<SourceHandle> {
        match SourceLocator::parse(locator)? {
            SourceLocator::Http(url) => self.http.open(url, options).await,
            SourceLocator::Magnet(magnet) => {
                let registry = self
                    .torrents
                    .as_ref()
                    .ok_or(SourceError::TorrentEngineUnavailable)?;
                registry.open(&magnet).await
            }
        }
    }
}

impl fmt::Debug for SourceAcquirer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceAcquirer")
            .field("torrents", &self.torrents.is_some())
            .finish()
    }
}
