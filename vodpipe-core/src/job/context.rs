use std::fmt;
use std::sync::Arc;

use crate::config::VodpipeConfig;
use crate::encode::{EncodeExecutor, EncodeJobBuilder, EncoderProfile};
use crate::ingest::{CatalogIngest, HttpCatalogIngest};
use crate::probe::MediaProber;
use crate::publish::{ObjectStore, S3ObjectStore, UploadPolicy};
use crate::source::{HttpSource, SourceAcquirer, TorrentEngine, TorrentRegistry};

use super::{JobRegistry, JobResult};

/// Process-wide collaborators shared by every job. Built once at startup
/// and passed to the runner explicitly.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<VodpipeConfig>,
    pub registry: Arc<JobRegistry>,
    pub sources: SourceAcquirer,
    pub store: Arc<dyn ObjectStore>,
    pub ingest: Arc<dyn CatalogIngest>,
}

impl PipelineContext {
    pub fn new(
        config: VodpipeConfig,
        sources: SourceAcquirer,
        store: Arc<dyn ObjectStore>,
        ingest: Arc<dyn CatalogIngest>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new(config.jobs.retention()));
        Self {
            config: Arc::new(config),
            registry,
            sources,
            store,
            ingest,
        }
    }

    /// Wires the HTTP source, S3 store and catalog client from config and
    /// environment. Magnet sources need a torrent engine.
    pub fn from_config(
        config: VodpipeConfig,
        torrent_engine: Option<Arc<dyn TorrentEngine>>,
    ) -> JobResult<Self> {
        let http = HttpSource::new(&config.source.user_agent, config.source.timeout())?;
        let torrents = torrent_engine.map(|engine| {
            Arc::new(TorrentRegistry::new(engine, config.source.metadata_timeout()))
        });
        let user_agent = &config.source.user_agent;
        let store = S3ObjectStore::from_section(
            config.storage.timeouts().client(user_agent)?,
            &config.storage,
        )?;
        let ingest = HttpCatalogIngest::from_section(
            config.ingest.timeouts().client(user_agent)?,
            &config.ingest,
        )?;
        Ok(Self::new(
            config,
            SourceAcquirer::new(http, torrents),
            Arc::new(store),
            Arc::new(ingest),
        ))
    }

    pub fn prober(&self) -> MediaProber {
        MediaProber::new(
            &self.config.encoder.ffprobe_path,
            self.config.encoder.probe_budget_bytes,
        )
    }

    pub fn executor(&self) -> EncodeExecutor {
        EncodeExecutor::new(&self.config.encoder.ffmpeg_path)
    }

    pub fn builder(&self) -> EncodeJobBuilder {
        EncodeJobBuilder::new(EncoderProfile::from(&self.config.encoder))
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy::from(&self.config.upload)
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("sources", &self.sources)
            .field("jobs", &self.registry.len())
            .finish()
    }
}
