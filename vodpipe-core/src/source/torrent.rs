use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{info, warn};
use url::Url;

use super::{ByteStream, SourceError, SourceHandle, SourceResult};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm"];

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("torrent {0} is already active")]
    Duplicate(String),
    #[error("torrent {0} is not active")]
    NotFound(String),
    #[error("torrent engine failure: {0}")]
    Engine(String),
    #[error("torrent read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    pub index: usize,
    pub name: String,
    pub length: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TorrentStats {
    pub download_bytes_per_sec: u64,
    pub progress: f64,
    pub peers: u32,
}

/// Process-wide torrent engine. `add` reports `Duplicate` when the info hash
/// is already active.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    async fn add(&self, magnet: &str) -> Result<Arc<dyn TorrentResource>, TorrentError>;
    async fn get(&self, info_hash: &str) -> Result<Option<Arc<dyn TorrentResource>>, TorrentError>;
}

#[async_trait]
pub trait TorrentResource: Send + Sync {
    fn info_hash(&self) -> &str;
    /// Resolves once metadata is known.
    async fn files(&self) -> Result<Vec<TorrentFile>, TorrentError>;
    async fn open_file(&self, index: usize) -> Result<ByteStream, TorrentError>;
    fn stats(&self) -> TorrentStats;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    uri: String,
    info_hash: String,
}

impl MagnetLink {
    pub fn parse(uri: &str) -> SourceResult<Self> {
        let parsed = Url::parse(uri).map_err(|err| SourceError::InvalidUrl {
            url: uri.to_string(),
            reason: err.to_string(),
        })?;
        if parsed.scheme() != "magnet" {
            return Err(SourceError::UnsupportedProtocol(uri.to_string()));
        }
        let info_hash = parsed
            .query_pairs()
            .filter(|(key, _)| key == "xt")
            .find_map(|(_, value)| {
                let value = value.to_string();
                let prefix = "urn:btih:";
                if value.len() > prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix)
                {
                    Some(value[prefix.len()..].to_ascii_lowercase())
                } else {
                    None
                }
            })
            .filter(|hash| hash.chars().all(|c| c.is_ascii_alphanumeric()))
            .ok_or_else(|| SourceError::MissingInfoHash(uri.to_string()))?;
        Ok(Self {
            uri: uri.to_string(),
            info_hash,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn info_hash(&self) -> &str {
        &self.info_hash
    }
}

/// First file whose extension is a known video container.
pub fn select_video_file(files: &[TorrentFile]) -> Option<&TorrentFile> {
    files.iter().find(|file| {
        Path::new(&file.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| VIDEO_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    })
}

type ResourceSlot = Arc<OnceCell<Arc<dyn TorrentResource>>>;

/// Get-or-create map of torrents being added, keyed by info hash.
/// Concurrent opens of the same magnet share one slot, so only the first
/// caller asks the engine to add it. A slot is released once the add
/// settles; later opens find the torrent through the engine itself.
pub struct TorrentRegistry {
    engine: Arc<dyn TorrentEngine>,
    active: Mutex<HashMap<String, ResourceSlot>>,
    metadata_timeout: Duration,
}

/// Releases the slot when the add settles or the caller gives up waiting.
struct SlotGuard<'a> {
    registry: &'a TorrentRegistry,
    info_hash: &'a str,
    slot: ResourceSlot,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(self.info_hash, &self.slot);
    }
}

impl TorrentRegistry {
    pub fn new(engine: Arc<dyn TorrentEngine>, metadata_timeout: Duration) -> Self {
        Self {
            engine,
            active: Mutex::new(HashMap::new()),
            metadata_timeout,
        }
    }

    pub async fn resource(&self, magnet: &MagnetLink) -> SourceResult<Arc<dyn TorrentResource>> {
        let slot = {
            let mut active = self
                .active
                .lock()
                .map_err(|_| TorrentError::Engine("registry lock poisoned".into()))?;
            active.entry(magnet.info_hash().to_string()).or_default().clone()
        };
        let guard = SlotGuard {
            registry: self,
            info_hash: magnet.info_hash(),
            slot,
        };
        let resource = guard
            .slot
            .get_or_try_init(|| self.add_or_lookup(magnet))
            .await
            .map(Arc::clone);
        resource
    }

    fn release(&self, info_hash: &str, slot: &ResourceSlot) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active
            .get(info_hash)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            active.remove(info_hash);
        }
    }

    /// Number of adds still in progress.
    pub fn pending(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn add_or_lookup(&self, magnet: &MagnetLink) -> SourceResult<Arc<dyn TorrentResource>> {
        match self.engine.add(magnet.uri()).await {
            Ok(resource) => {
                info!(info_hash = magnet.info_hash(), "torrent added");
                Ok(resource)
            }
            Err(TorrentError::Duplicate(_)) => {
                info!(info_hash = magnet.info_hash(), "torrent already active, reusing");
                self.engine
                    .get(magnet.info_hash())
                    .await?
                    .ok_or_else(|| TorrentError::NotFound(magnet.info_hash().to_string()).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn open(&self, magnet: &MagnetLink) -> SourceResult<SourceHandle> {
        let wait = async {
            let resource = self.resource(magnet).await?;
            let files = resource.files().await?;
            Ok::<_, SourceError>((resource, files))
        };
        let (resource, files) = timeout(self.metadata_timeout, wait)
            .await
            .map_err(|_| SourceError::MetadataTimeout {
                info_hash: magnet.info_hash().to_string(),
                seconds: self.metadata_timeout.as_secs(),
            })??;

        if files.is_empty() {
            return Err(SourceError::EmptyTorrent {
                info_hash: magnet.info_hash().to_string(),
            });
        }
        let file = select_video_file(&files).ok_or_else(|| SourceError::NoVideoFileFound {
            info_hash: magnet.info_hash().to_string(),
        })?;
        info!(
            info_hash = magnet.info_hash(),
            file = %file.name,
            size_mb = file.length / (1024 * 1024),
            "selected torrent file"
        );

        let inner = resource.open_file(file.index).await?;
        let reporter = spawn_progress_reporter(Arc::clone(&resource));
        let reader = ProgressReader { inner, reporter };
        Ok(SourceHandle::new(Box::new(reader))
            .with_content_length(Some(file.length))
            .with_file_name(file.name.clone()))
    }
}

fn spawn_progress_reporter(resource: Arc<dyn TorrentResource>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(PROGRESS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = resource.stats();
            if stats.progress >= 1.0 {
                info!(info_hash = resource.info_hash(), "torrent fully downloaded");
                break;
            }
            if stats.download_bytes_per_sec == 0 && stats.peers == 0 {
                warn!(info_hash = resource.info_hash(), "torrent has no peers");
                continue;
            }
            info!(
                info_hash = resource.info_hash(),
                speed_mb_s = stats.download_bytes_per_sec as f64 / (1024.0 * 1024.0),
                progress_pct = stats.progress * 100.0,
                peers = stats.peers,
                "torrent transfer"
            );
        }
    })
}

struct ProgressReader {
    inner: ByteStream,
    reporter: JoinHandle<()>,
}

impl AsyncRead for ProgressReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for ProgressReader {
    fn drop(&mut self) {
        self.reporter.abort();
    }
}
