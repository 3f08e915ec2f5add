use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VodpipeConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub source: SourceSection,
    pub encoder: EncoderSection,
    #[serde(default)]
    pub upload: UploadSection,
    pub storage: StorageSection,
    pub ingest: IngestSection,
    #[serde(default)]
    pub jobs: JobsSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub output_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default = "default_metadata_timeout")]
    pub torrent_metadata_timeout_seconds: u64,
}

impl SourceSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.torrent_metadata_timeout_seconds)
    }
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_redirects: default_max_redirects(),
            torrent_metadata_timeout_seconds: default_metadata_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderSection {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default)]
    pub video_codec_args: Vec<String>,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,
    #[serde(default = "default_segment_duration")]
    pub segment_duration_seconds: u32,
    #[serde(default = "default_thumbnail_interval")]
    pub thumbnail_interval_seconds: u32,
    #[serde(default = "default_probe_budget")]
    pub probe_budget_bytes: usize,
    #[serde(default = "default_subtitle_segment")]
    pub subtitle_segment_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadSection {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_busy_delay")]
    pub busy_retry_delay_ms: u64,
    #[serde(default = "default_network_delay")]
    pub network_retry_delay_ms: u64,
    #[serde(default = "default_stability")]
    pub stability_ms: u64,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            busy_retry_delay_ms: default_busy_delay(),
            network_retry_delay_ms: default_network_delay(),
            stability_ms: default_stability(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key_id_env: String,
    pub secret_access_key_env: String,
    pub public_base: String,
    #[serde(default = "default_http_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl StorageSection {
    pub fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts::from_millis(self.connect_timeout_ms, self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSection {
    pub url: String,
    pub key_env: String,
    #[serde(default = "default_http_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl IngestSection {
    pub fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts::from_millis(self.connect_timeout_ms, self.read_timeout_ms)
    }
}

/// Bounds for outbound HTTP calls. `read` limits how long the client waits
/// on a silent peer, not the length of a transfer that keeps making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl HttpTimeouts {
    pub fn from_millis(connect_ms: u64, read_ms: u64) -> Self {
        Self {
            connect: Duration::from_millis(connect_ms),
            read: Duration::from_millis(read_ms),
        }
    }

    pub fn client(&self, user_agent: &str) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(self.connect)
            .read_timeout(self.read)
            .build()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsSection {
    #[serde(default = "default_retention")]
    pub retention_minutes: u64,
}

impl JobsSection {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_minutes.saturating_mul(60))
    }
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            retention_minutes: default_retention(),
        }
    }
}

fn default_user_agent() -> String {
    "VodPipe-Transcoder/1.0".to_string()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_redirects() -> u32 {
    5
}

fn default_metadata_timeout() -> u64 {
    60
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_audio_bitrate() -> u32 {
    128
}

fn default_segment_duration() -> u32 {
    15
}

fn default_thumbnail_interval() -> u32 {
    10
}

fn default_probe_budget() -> usize {
    50 * 1024 * 1024
}

fn default_subtitle_segment() -> u32 {
    600
}

fn default_concurrency() -> usize {
    15
}

fn default_max_retries() -> u32 {
    10
}

fn default_busy_delay() -> u64 {
    1_000
}

fn default_network_delay() -> u64 {
    2_000
}

fn default_stability() -> u64 {
    1_000
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_retention() -> u64 {
    60
}

/// Reads a secret from the environment variable named in the config.
pub fn read_env_secret(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingEnv(name.to_string())),
    }
}

pub fn load_vodpipe_config<P: AsRef<Path>>(path: P) -> Result<VodpipeConfig> {
    let path = path.as_ref();
    let config: VodpipeConfig = load_toml(path)?;
    config.validate().map_err(|reason| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(config)
}

impl VodpipeConfig {
    /// Rejects values that would stall or divide by zero at runtime.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let counts = [
            ("source.timeout_ms", self.source.timeout_ms),
            (
                "source.torrent_metadata_timeout_seconds",
                self.source.torrent_metadata_timeout_seconds,
            ),
            (
                "encoder.segment_duration_seconds",
                self.encoder.segment_duration_seconds.into(),
            ),
            (
                "encoder.thumbnail_interval_seconds",
                self.encoder.thumbnail_interval_seconds.into(),
            ),
            (
                "encoder.subtitle_segment_seconds",
                self.encoder.subtitle_segment_seconds.into(),
            ),
            ("encoder.audio_bitrate_kbps", self.encoder.audio_bitrate_kbps.into()),
            ("encoder.probe_budget_bytes", self.encoder.probe_budget_bytes as u64),
            ("upload.concurrency", self.upload.concurrency as u64),
            ("storage.connect_timeout_ms", self.storage.connect_timeout_ms),
            ("storage.read_timeout_ms", self.storage.read_timeout_ms),
            ("ingest.connect_timeout_ms", self.ingest.connect_timeout_ms),
            ("ingest.read_timeout_ms", self.ingest.read_timeout_ms),
        ];
        match counts.iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(format!("{field} must be greater than zero")),
            None => Ok(()),
        }
    }
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
