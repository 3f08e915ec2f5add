pub mod config;
pub mod encode;
pub mod error;
pub mod ingest;
pub mod job;
pub mod ladder;
pub mod paths;
pub mod playlist;
pub mod probe;
pub mod publish;
pub mod source;

pub use config::{
    load_vodpipe_config, read_env_secret, EncoderSection, HttpTimeouts, IngestSection,
    JobsSection, PathsSection, SourceSection, StorageSection, UploadSection, VodpipeConfig,
};
pub use encode::{
    AudioSelection, EncodeCommand, EncodeError, EncodeExecutor, EncodeJobBuilder, EncodeJobSpec,
    EncodeResult, EncoderProfile, SubtitleSelection, SubtitleSource,
};
pub use error::{ConfigError, Result};
pub use ingest::{CatalogIngest, HttpCatalogIngest, IngestError, IngestRequest, IngestResult};
pub use job::{
    JobError, JobEvent, JobHandle, JobOutcome, JobRegistry, JobRequest, JobResult, JobRunner,
    JobStatus, PipelineContext,
};
pub use ladder::{plan, RenditionLadder, RenditionSpec, TRUE_4K_MIN_WIDTH};
pub use paths::{MediaKind, MediaMeta, OutputTree};
pub use probe::{MediaProber, ProbeError, ProbeOutcome, ProbeResult, StreamInfo, StreamKind};
pub use publish::{
    final_sweep, LiveUploader, ObjectStore, S3ObjectStore, StoreError, SweepReport, UploadError,
    UploadPolicy, UploadResult, UploadStats,
};
pub use source::{
    ByteStream, HttpSource, MagnetLink, OpenOptions, SourceAcquirer, SourceError, SourceHandle,
    SourceLocator, SourceResult, TorrentEngine, TorrentRegistry,
};
