use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, info, warn};

use crate::source::ByteStream;

use super::{EncodeError, EncodeResult};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct EncodeExecutor {
    program: PathBuf,
}

impl EncodeExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs the encoder to completion with `input` on its stdin. Lines
    /// reporting progress are handed to `on_progress`.
    pub async fn run(
        &self,
        args: &[String],
        input: ByteStream,
        on_progress: &(dyn Fn(&str) + Send + Sync),
    ) -> EncodeResult<()> {
        debug!(program = %self.program.display(), args = %args.join(" "), "spawning encoder");
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EncodeError::EncodeSpawnFailed {
                source,
                path: self.program.clone(),
            })?;

        let feeder = child.stdin.take().map(|stdin| tokio::spawn(feed_encoder(input, stdin)));
        let stderr = child.stderr.take();

        let drain = async {
            match stderr {
                Some(stderr) => drain_diagnostics(stderr, on_progress).await,
                None => VecDeque::new(),
            }
        };
        let (status, tail) = tokio::join!(child.wait(), drain);
        if let Some(feeder) = feeder {
            feeder.abort();
        }
        let status = status.map_err(|source| EncodeError::Io {
            source,
            path: self.program.clone(),
        })?;

        let code = normalize_exit_code(exit_code(status));
        if code != 0 {
            return Err(EncodeError::EncodeProcessFailed {
                code,
                stderr_tail: tail.into_iter().collect::<Vec<_>>().join("\n"),
            });
        }
        info!(program = %self.program.display(), "encoder finished");
        Ok(())
    }
}

async fn feed_encoder(mut input: ByteStream, mut stdin: ChildStdin) {
    match tokio::io::copy(&mut input, &mut stdin).await {
        Ok(bytes) => debug!(bytes, "source fully piped to encoder"),
        // the encoder closes its input when it stops reading
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
        Err(err) => warn!(error = %err, "source stream ended with error"),
    }
    let _ = stdin.shutdown().await;
}

async fn drain_diagnostics<R>(mut stderr: R, on_progress: &(dyn Fn(&str) + Send + Sync)) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut pending = Vec::new();
    let mut chunk = [0u8; 8 * 1024];
    loop {
        let read = match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        for byte in &chunk[..read] {
            if *byte == b'\r' || *byte == b'\n' {
                handle_line(&pending, &mut tail, on_progress);
                pending.clear();
            } else {
                pending.push(*byte);
            }
        }
    }
    handle_line(&pending, &mut tail, on_progress);
    tail
}

fn handle_line(
    raw: &[u8],
    tail: &mut VecDeque<String>,
    on_progress: &(dyn Fn(&str) + Send + Sync),
) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    if line.to_lowercase().contains("error") || line.contains("Invalid") {
        warn!(line, "encoder diagnostic");
    }
    if line.contains("speed=") {
        on_progress(line);
    }
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}

/// Raw exit code. A process killed by a signal reports the negated signal.
pub fn exit_code(status: ExitStatus) -> i64 {
    if let Some(code) = status.code() {
        return i64::from(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -i64::from(signal);
        }
    }
    -1
}

/// Maps an unsigned 32-bit wraparound of a negative code back to its
/// signed value.
pub fn normalize_exit_code(raw: i64) -> i64 {
    if raw > i64::from(i32::MAX) && raw <= i64::from(u32::MAX) {
        raw - (1_i64 << 32)
    } else {
        raw
    }
}
