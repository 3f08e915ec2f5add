use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use vodpipe_core::config::{load_vodpipe_config, read_env_secret, VodpipeConfig};
use vodpipe_core::encode::{AudioSelection, SubtitleSelection, SubtitleSource};
use vodpipe_core::job::{JobError, JobEvent, JobRequest, JobRunner, PipelineContext};
use vodpipe_core::ladder::{plan, RenditionLadder};
use vodpipe_core::paths::{MediaKind, MediaMeta};
use vodpipe_core::probe::{MediaProber, ProbeError, ProbeResult, StreamKind};
use vodpipe_core::source::{HttpSource, OpenOptions, SourceAcquirer, SourceError};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vodpipe_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("job {id} failed: {msg}")]
    JobFailed { id: String, msg: String },
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "VOD ingestion and HLS publishing control interface", long_about = None)]
pub struct Cli {
    /// Path to vodpipe.toml
    #[arg(long, default_value = "configs/vodpipe.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub log_json: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs one job end to end and streams its events
    Run(RunArgs),
    /// Probes a source without encoding anything
    Probe(ProbeArgs),
    /// Shows the renditions planned for a source width
    Ladder(LadderArgs),
    /// Checks binaries, directories and secrets
    Health,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON job request; replaces every other flag below
    #[arg(long, conflicts_with_all = ["url", "title"])]
    pub request: Option<PathBuf>,
    /// Source URL (http, https or magnet)
    #[arg(long, required_unless_present = "request")]
    pub url: Option<String>,
    #[arg(long, default_value = "Geral")]
    pub genre: String,
    #[arg(long, value_enum, default_value_t = KindArg::Movie)]
    pub kind: KindArg,
    #[arg(long, required_unless_present = "request")]
    pub title: Option<String>,
    #[arg(long)]
    pub season: Option<u32>,
    #[arg(long)]
    pub episode: Option<u32>,
    #[arg(long)]
    pub episode_name: Option<String>,
    /// Extra request header, `Name: value`
    #[arg(long = "header")]
    pub headers: Vec<String>,
    /// Audio track, `INDEX:LANG:NAME`
    #[arg(long = "audio")]
    pub audio: Vec<String>,
    /// Embedded subtitle, `INDEX:LANG:NAME`
    #[arg(long = "subtitle")]
    pub subtitles: Vec<String>,
    /// External subtitle file, `LANG:NAME:PATH`
    #[arg(long = "subtitle-file")]
    pub subtitle_files: Vec<String>,
    /// Language of the subtitle marked as default
    #[arg(long)]
    pub default_subtitle: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Movie,
    Series,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Source URL (http or https)
    #[arg(long)]
    pub url: String,
    /// Extra request header, `Name: value`
    #[arg(long = "header")]
    pub headers: Vec<String>,
}

#[derive(Args, Debug)]
pub struct LadderArgs {
    /// Source width in pixels
    #[arg(long)]
    pub width: u32,
}

/// Installs the global subscriber. `RUST_LOG` overrides the default level.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = result {
        eprintln!("tracing already initialised: {err}");
    }
}

pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Ladder(args) => {
            render(&LadderReport::from(plan(args.width)), cli.format)?;
        }
        Commands::Health => {
            let report = health_check(&cli.config);
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
        Commands::Probe(args) => {
            let config = load_vodpipe_config(&cli.config)?;
            let runtime = tokio::runtime::Runtime::new()?;
            let result = runtime.block_on(probe(&config, args))?;
            render(&ProbeReport::from(result), cli.format)?;
        }
        Commands::Run(args) => {
            let config = load_vodpipe_config(&cli.config)?;
            let request = job_request(args)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_job(config, request, cli.format))?;
        }
    }
    Ok(())
}

async fn probe(config: &VodpipeConfig, args: &ProbeArgs) -> Result<ProbeResult> {
    let http = HttpSource::new(&config.source.user_agent, config.source.timeout())?;
    let sources = SourceAcquirer::new(http, None);
    let options = OpenOptions::from_section(&config.source).with_headers(parse_headers(&args.headers)?);
    let mut handle = sources.open(&args.url, &options).await?;
    let prober = MediaProber::new(&config.encoder.ffprobe_path, config.encoder.probe_budget_bytes);
    let outcome = prober
        .probe(handle.reader(), &|line| tracing::debug!(line, "prober"))
        .await?;
    Ok(outcome.result)
}

async fn run_job(config: VodpipeConfig, request: JobRequest, format: OutputFormat) -> Result<()> {
    let ctx = Arc::new(PipelineContext::from_config(config, None)?);
    let runner = JobRunner::new(Arc::clone(&ctx));
    let handle = runner.submit(request);
    let mut events = ctx
        .registry
        .subscribe(&handle.id)
        .ok_or_else(|| AppError::MissingResource(format!("job {}", handle.id)))?;
    let mut failure = None;
    while let Some(event) = events.recv().await {
        if let JobEvent::Error { msg } = &event {
            failure = Some(msg.clone());
        }
        match format {
            OutputFormat::Text => println!("{}", event_line(&event)),
            OutputFormat::Json => println!("{}", serde_json::to_string(&event)?),
        }
    }
    match failure {
        Some(msg) => Err(AppError::JobFailed { id: handle.id, msg }),
        None => Ok(()),
    }
}

pub fn event_line(event: &JobEvent) -> String {
    match event {
        JobEvent::Start { id, target, msg } => format!("[start] {id} -> {target}: {msg}"),
        JobEvent::Info { msg } => format!("[info] {msg}"),
        JobEvent::Log { step, line } => format!("[{step}] {line}"),
        JobEvent::Error { msg } => format!("[error] {msg}"),
        JobEvent::Done { msg, out_root } => format!("[done] {msg} ({out_root})"),
        JobEvent::Final { status } => format!("[final] {status:?}"),
    }
}

fn job_request(args: &RunArgs) -> Result<JobRequest> {
    if let Some(path) = &args.request {
        let text = std::fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&text)?);
    }
    let url = args
        .url
        .clone()
        .ok_or_else(|| AppError::InvalidArgument("--url is required".to_string()))?;
    let title = args
        .title
        .clone()
        .ok_or_else(|| AppError::InvalidArgument("--title is required".to_string()))?;
    let meta = MediaMeta {
        genre: args.genre.clone(),
        kind: match args.kind {
            KindArg::Movie => MediaKind::Movie,
            KindArg::Series => MediaKind::Series,
        },
        title,
        season: args.season,
        episode: args.episode,
        episode_name: args.episode_name.clone(),
    };

    let audio_tracks = args
        .audio
        .iter()
        .map(|spec| {
            let (index, lang, name) = indexed_track(spec)?;
            Ok(AudioSelection {
                stream_index: index,
                lang,
                name,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let is_default = |lang: &str| args.default_subtitle.as_deref() == Some(lang);
    let mut subtitle_tracks = Vec::new();
    for spec in &args.subtitles {
        let (index, lang, name) = indexed_track(spec)?;
        subtitle_tracks.push(SubtitleSelection {
            source: SubtitleSource::Internal {
                stream_index: index,
            },
            default: is_default(&lang),
            lang,
            name,
        });
    }
    for spec in &args.subtitle_files {
        let mut parts = spec.splitn(3, ':');
        let (Some(lang), Some(name), Some(path)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AppError::InvalidArgument(format!(
                "subtitle file must be LANG:NAME:PATH, got {spec}"
            )));
        };
        subtitle_tracks.push(SubtitleSelection {
            source: SubtitleSource::External {
                path: PathBuf::from(path),
                charset: None,
            },
            lang: lang.to_string(),
            name: name.to_string(),
            default: is_default(lang),
        });
    }

    Ok(JobRequest {
        url,
        headers: parse_headers(&args.headers)?,
        meta,
        audio_tracks,
        subtitle_tracks,
    })
}

/// Parses `INDEX:LANG:NAME`. The name may contain colons.
pub fn indexed_track(spec: &str) -> Result<(u32, String, String)> {
    let mut parts = spec.splitn(3, ':');
    let (Some(index), Some(lang), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AppError::InvalidArgument(format!(
            "track must be INDEX:LANG:NAME, got {spec}"
        )));
    };
    let index = index
        .trim()
        .parse::<u32>()
        .map_err(|_| AppError::InvalidArgument(format!("invalid stream index in {spec}")))?;
    let lang = lang.trim();
    if lang.is_empty() {
        return Err(AppError::InvalidArgument(format!("missing language in {spec}")));
    }
    Ok((index, lang.to_string(), name.trim().to_string()))
}

pub fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|header| {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| AppError::InvalidArgument(format!("header must be `Name: value`, got {header}")))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(AppError::InvalidArgument(format!("empty header name in {header}")));
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct LadderReport {
    pub is_source_true_4k: bool,
    pub renditions: Vec<LadderRow>,
}

#[derive(Debug, Serialize)]
pub struct LadderRow {
    pub key: String,
    pub resolution: String,
    pub bitrate_kbps: u32,
}

impl From<RenditionLadder> for LadderReport {
    fn from(ladder: RenditionLadder) -> Self {
        Self {
            is_source_true_4k: ladder.is_source_true_4k,
            renditions: ladder
                .renditions
                .into_iter()
                .map(|r| LadderRow {
                    resolution: format!("{}x{}", r.width, r.height),
                    key: r.key,
                    bitrate_kbps: r.bitrate_kbps,
                })
                .collect(),
        }
    }
}

impl DisplayFallback for LadderReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "true 4K: {}",
            if self.is_source_true_4k { "yes" } else { "no" }
        )];
        for row in &self.renditions {
            lines.push(format!(
                "  - {} {} @ {} kbps",
                row.key, row.resolution, row.bitrate_kbps
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub container: Option<String>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub duration_seconds: Option<f64>,
    pub streams: Vec<StreamRow>,
    pub ladder: LadderReport,
}

#[derive(Debug, Serialize)]
pub struct StreamRow {
    pub index: u32,
    pub kind: String,
    pub codec: Option<String>,
    pub language: Option<String>,
}

impl From<ProbeResult> for ProbeReport {
    fn from(result: ProbeResult) -> Self {
        let streams = result
            .streams
            .iter()
            .map(|stream| StreamRow {
                index: stream.index,
                kind: match stream.kind {
                    StreamKind::Video => "video",
                    StreamKind::Audio => "audio",
                    StreamKind::Subtitle => "subtitle",
                    StreamKind::Other => "other",
                }
                .to_string(),
                codec: stream.codec.clone(),
                language: stream.language.clone(),
            })
            .collect();
        Self {
            container: result.container_format.clone(),
            width: result.width(),
            height: result.height(),
            frame_rate: result.frame_rate(),
            duration_seconds: result.duration(),
            streams,
            ladder: LadderReport::from(plan(result.width())),
        }
    }
}

impl DisplayFallback for ProbeReport {
    fn display(&self) -> String {
        let duration = self
            .duration_seconds
            .map(|d| format!("{d:.1}s"))
            .unwrap_or_else(|| "-".to_string());
        let mut lines = vec![format!(
            "{} | {}x{} | {:.3} fps | dur={}",
            self.container.as_deref().unwrap_or("<unknown>"),
            self.width,
            self.height,
            self.frame_rate,
            duration
        )];
        for stream in &self.streams {
            lines.push(format!(
                "  #{} {} codec={} lang={}",
                stream.index,
                stream.kind,
                stream.codec.as_deref().unwrap_or("-"),
                stream.language.as_deref().unwrap_or("-")
            ));
        }
        lines.push(self.ladder.display());
        lines.join("\n")
    }
}

fn health_check(config_path: &Path) -> Vec<HealthEntry> {
    let mut results = vec![check_path("vodpipe.toml", config_path)];
    let config = match load_vodpipe_config(config_path) {
        Ok(config) => config,
        Err(err) => {
            results.push(HealthEntry::error("config", err.to_string()));
            return results;
        }
    };
    results.push(check_path("ffmpeg", &config.encoder.ffmpeg_path));
    results.push(check_path("ffprobe", &config.encoder.ffprobe_path));
    results.push(check_directory("output_root", &config.paths.output_root));
    for name in [
        &config.storage.access_key_id_env,
        &config.storage.secret_access_key_env,
        &config.ingest.key_env,
    ] {
        results.push(match read_env_secret(name) {
            Ok(_) => HealthEntry::ok(name.as_str(), "set"),
            Err(err) => HealthEntry::error(name.as_str(), err.to_string()),
        });
    }
    if config.storage.public_base.trim().is_empty() {
        results.push(HealthEntry::error("storage.public_base", "empty"));
    }
    results
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{path} missing", path = path.display()))
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::error(
            name,
            format!("{path} is not a directory", path = path.display()),
        ),
        Err(_) => HealthEntry::warn(
            name,
            format!("{path} not found, created on first job", path = path.display()),
        ),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
