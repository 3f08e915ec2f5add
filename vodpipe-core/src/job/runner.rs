use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::encode::{
    detect_subtitle_charset, working_frame_rate, AudioSelection, EncodeJobSpec, SubtitleSelection,
    SubtitleSource,
};
use crate::ingest::IngestRequest;
use crate::ladder::plan;
use crate::paths::{MediaMeta, OutputTree};
use crate::playlist::{normalize_in_place, write_master, write_thumbnail_vtt, ManifestOptions};
use crate::probe::{ProbeOutcome, ProbeResult};
use crate::publish::{final_sweep, LiveUploader, SweepReport, UploadError, UploadStats};
use crate::source::OpenOptions;

use super::{JobError, JobEvent, JobResult, JobStatus, PipelineContext};

/// Height cap of the HD-only master playlist.
const HD_MAX_HEIGHT: u32 = 1080;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub meta: MediaMeta,
    #[serde(default)]
    pub audio_tracks: Vec<AudioSelection>,
    #[serde(default)]
    pub subtitle_tracks: Vec<SubtitleSelection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub out_root: PathBuf,
    pub target: String,
    pub has_4k: bool,
    pub renditions: Vec<String>,
    pub live: UploadStats,
    pub sweep: SweepReport,
}

/// Records events for one job in the shared registry.
struct JobEmitter<'a> {
    ctx: &'a PipelineContext,
    id: &'a str,
}

impl JobEmitter<'_> {
    fn emit(&self, event: JobEvent) {
        self.ctx.registry.push(self.id, event);
    }

    fn info(&self, msg: impl Into<String>) {
        self.emit(JobEvent::info(msg));
    }

    fn log(&self, step: &str, line: &str) {
        self.emit(JobEvent::log(step, line));
    }
}

#[derive(Debug, Clone)]
pub struct JobRunner {
    ctx: Arc<PipelineContext>,
}

impl JobRunner {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Registers the job and runs it in the background. `start` is always
    /// the first event and exactly one of `final` or `error` the last.
    pub fn submit(&self, request: JobRequest) -> JobHandle {
        let target = request.meta.remote_prefix();
        let id = self.ctx.registry.register(&target);
        self.ctx.registry.push(
            &id,
            JobEvent::Start {
                id: id.clone(),
                target: target.clone(),
                msg: "job started".to_string(),
            },
        );
        info!(job = %id, target = %target, url = %request.url, "job submitted");

        let runner = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            match runner.run(&job_id, &request).await {
                Ok(_) => {
                    runner.ctx.registry.push(
                        &job_id,
                        JobEvent::Final {
                            status: JobStatus::Done,
                        },
                    );
                }
                Err(err) => {
                    error!(job = %job_id, error = %err, "job failed");
                    runner.ctx.registry.push(
                        &job_id,
                        JobEvent::Error {
                            msg: err.to_string(),
                        },
                    );
                }
            }
        });
        JobHandle { id, target }
    }

    /// Runs the pipeline for a registered job, recording progress events.
    pub async fn run(&self, id: &str, request: &JobRequest) -> JobResult<JobOutcome> {
        let ctx = self.ctx.as_ref();
        let emitter = JobEmitter { ctx, id };
        let config = &ctx.config;
        let target = request.meta.remote_prefix();
        let options = OpenOptions::from_section(&config.source).with_headers(request.headers.clone());

        let mut probe_source = ctx.sources.open(&request.url, &options).await?;
        let probed = ctx
            .prober()
            .probe(probe_source.reader(), &|line| emitter.log("probe", line))
            .await;
        drop(probe_source);
        let probed = probed?;
        let probe = &probed.result;

        let ladder = plan(probe.width());
        let keys: Vec<String> = ladder.renditions.iter().map(|r| r.key.clone()).collect();
        let has_4k = ladder.is_source_true_4k && keys.iter().any(|key| key == "2160p");
        emitter.info(format!(
            "source {}x{} | true 4K: {} | outputs: {}",
            probe.width(),
            probe.height(),
            if ladder.is_source_true_4k { "yes" } else { "no" },
            keys.join(" + ")
        ));

        let source_fps = probe.frame_rate();
        let spec = EncodeJobSpec {
            renditions: ladder.renditions.clone(),
            audio_tracks: request.audio_tracks.clone(),
            subtitle_tracks: with_detected_charsets(&request.subtitle_tracks).await?,
            segment_duration_seconds: config.encoder.segment_duration_seconds,
            thumbnail_interval_seconds: config.encoder.thumbnail_interval_seconds,
            source_frame_rate: source_fps,
            working_frame_rate: working_frame_rate(source_fps),
        };
        spec.validate()?;

        let root = request.meta.output_root(&config.paths.output_root);
        let audio_langs: Vec<String> = request.audio_tracks.iter().map(|a| a.lang.clone()).collect();
        OutputTree::new(&root)
            .create(&ladder.renditions, &audio_langs)
            .await
            .map_err(|source| JobError::Io {
                source,
                path: root.clone(),
            })?;
        let root = tokio::fs::canonicalize(&root)
            .await
            .map_err(|source| JobError::Io {
                source,
                path: root.clone(),
            })?;
        let tree = OutputTree::new(root);
        emitter.info(format!("local output: {}", tree.root().display()));

        let uploader = LiveUploader::start(
            tree.root(),
            target.clone(),
            Arc::clone(&ctx.store),
            ctx.upload_policy(),
        )?;

        let command = ctx.builder().build(&spec, &tree)?;

        let input = match ctx.sources.open(&request.url, &options).await {
            Ok(handle) => handle.into_reader(),
            Err(err) => {
                warn!(job = %id, error = %err, "reopening source failed, replaying probed bytes");
                emitter.info(format!(
                    "reopen failed ({err}), encoding from {} probed bytes",
                    probed.replay.len()
                ));
                probed.replay_stream()
            }
        };

        emitter.info("encoding");
        ctx.executor()
            .run(&command.args, input, &|line| emitter.log("encode", line))
            .await?;

        if let Some(duration) = probe.duration().filter(|d| *d > 0.0) {
            write_thumbnail_vtt(
                &tree.thumbnail_vtt(),
                duration,
                config.encoder.thumbnail_interval_seconds,
            )
            .await?;
        }
        for playlist in &command.child_playlists {
            normalize_in_place(playlist).await?;
        }
        write_master(
            &tree.master(),
            &ladder.renditions,
            &command.audio_entries,
            &command.subtitle_entries,
            &ManifestOptions::default(),
        )
        .await?;
        write_master(
            &tree.master_hd(),
            &ladder.renditions,
            &command.audio_entries,
            &command.subtitle_entries,
            &ManifestOptions::capped(HD_MAX_HEIGHT),
        )
        .await?;

        emitter.info("final upload sweep");
        let live = uploader.shutdown().await;
        let policy = ctx.upload_policy();
        let sweep = final_sweep(tree.root(), &target, Arc::clone(&ctx.store), &policy).await?;
        if !sweep.failed.is_empty() {
            return Err(UploadError::SweepIncomplete {
                failed: sweep.failed,
            }
            .into());
        }

        let ingest = IngestRequest::new(&target, &config.storage.public_base, has_4k)?;
        emitter.info(format!(
            "calling catalog ingest: prefix=\"{}\" has_4k={}",
            ingest.r2_prefix, ingest.has_4k
        ));
        let response = ctx.ingest.notify(&ingest).await?;
        emitter.info(format!(
            "catalog ingest ok: {}",
            response.get("hls").unwrap_or(&response)
        ));

        if let Err(err) = tree.remove().await {
            warn!(job = %id, path = %tree.root().display(), error = %err, "failed to remove local output");
        }

        let out_root = tree.root().to_path_buf();
        emitter.emit(JobEvent::Done {
            msg: "completed".to_string(),
            out_root: out_root.display().to_string(),
        });
        info!(job = %id, target = %target, has_4k, "job completed");
        Ok(JobOutcome {
            out_root,
            target,
            has_4k,
            renditions: keys,
            live,
            sweep,
        })
    }

    /// Opens and probes a source without allocating any output.
    pub async fn probe_source(&self, url: &str, headers: Vec<(String, String)>) -> JobResult<ProbeResult> {
        let options = OpenOptions::from_section(&self.ctx.config.source).with_headers(headers);
        let mut handle = self.ctx.sources.open(url, &options).await?;
        let ProbeOutcome { result, .. } = self
            .ctx
            .prober()
            .probe(handle.reader(), &|line| tracing::debug!(line, "prober"))
            .await?;
        Ok(result)
    }
}

async fn with_detected_charsets(tracks: &[SubtitleSelection]) -> JobResult<Vec<SubtitleSelection>> {
    let mut resolved = Vec::with_capacity(tracks.len());
    for track in tracks {
        let mut track = track.clone();
        if let SubtitleSource::External { path, charset } = &mut track.source {
            if charset.is_none() {
                *charset = detect_subtitle_charset(path).await?.map(str::to_string);
            }
        }
        resolved.push(track);
    }
    Ok(resolved)
}
