mod error;
mod types;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::source::ByteStream;

pub use error::ProbeError;
pub use types::{parse_frame_rate, ProbeResult, StreamInfo, StreamKind, DEFAULT_FRAME_RATE};

const PROBE_ARGS: &[&str] = &[
    "-v",
    "quiet",
    "-print_format",
    "json",
    "-show_format",
    "-show_streams",
    "-i",
    "pipe:0",
];

const CHUNK_SIZE: usize = 64 * 1024;

/// A probe result plus every source byte read while probing.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub result: ProbeResult,
    pub replay: Bytes,
}

impl ProbeOutcome {
    /// Replays the probed prefix. Used when the source cannot be reopened.
    pub fn replay_stream(&self) -> ByteStream {
        Box::new(std::io::Cursor::new(self.replay.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct MediaProber {
    program: PathBuf,
    budget: usize,
}

impl MediaProber {
    pub fn new(program: impl Into<PathBuf>, budget: usize) -> Self {
        Self {
            program: program.into(),
            budget,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Feeds at most `budget` bytes of `source` to the prober, then closes
    /// its input. Reading from `source` stops at the budget.
    pub async fn probe<R>(
        &self,
        source: &mut R,
        on_log: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<ProbeOutcome, ProbeError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut child = Command::new(&self.program)
            .args(PROBE_ARGS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::ProbeProcessError {
                source,
                path: self.program.clone(),
            })?;

        let stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("prober stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("prober stderr not captured"))?;

        let feed = feed_prober(source, stdin, self.budget);
        let collect_stdout = async {
            let mut out = Vec::new();
            stdout.read_to_end(&mut out).await.map(|_| out)
        };
        let collect_stderr = async {
            let mut captured = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                on_log(line);
                captured.push_str(line);
                captured.push('\n');
            }
            captured
        };

        let (fed, stdout, stderr) = tokio::join!(feed, collect_stdout, collect_stderr);
        let status = child.wait().await?;
        let replay = fed.map_err(ProbeError::SourceRead)?;
        let stdout = stdout?;
        let code = status.code();
        debug!(
            program = %self.program.display(),
            code = ?code,
            fed_bytes = replay.len(),
            "prober exited"
        );

        let text = String::from_utf8_lossy(&stdout);
        if text.trim().is_empty() {
            return Err(ProbeError::ProbeOutputEmpty {
                code,
                stderr: stderr.trim().to_string(),
            });
        }
        let document = extract_json_object(&text).ok_or_else(|| ProbeError::ProbeParseError {
            reason: "no complete JSON object in output".to_string(),
            code,
            stderr: stderr.trim().to_string(),
        })?;
        let raw: types::RawProbe =
            serde_json::from_str(document).map_err(|err| ProbeError::ProbeParseError {
                reason: err.to_string(),
                code,
                stderr: stderr.trim().to_string(),
            })?;
        let result = ProbeResult::from(raw);
        info!(
            width = result.width(),
            height = result.height(),
            duration = ?result.duration(),
            streams = result.streams.len(),
            "probe complete"
        );
        Ok(ProbeOutcome { result, replay })
    }
}

async fn feed_prober<R, W>(
    source: &mut R,
    mut sink: Option<W>,
    budget: usize,
) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut replay = BytesMut::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    while replay.len() < budget {
        let want = CHUNK_SIZE.min(budget - replay.len());
        let read = source.read(&mut chunk[..want]).await?;
        if read == 0 {
            break;
        }
        replay.extend_from_slice(&chunk[..read]);
        if let Some(pipe) = sink.as_mut() {
            if pipe.write_all(&chunk[..read]).await.is_err() {
                // prober has what it needs and closed its input
                break;
            }
        }
    }
    if let Some(mut pipe) = sink.take() {
        let _ = pipe.shutdown().await;
    }
    Ok(replay.freeze())
}

/// Returns the first balanced `{...}` in `text`, skipping braces inside
/// JSON strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
