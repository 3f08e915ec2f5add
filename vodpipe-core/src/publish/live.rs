use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use notify::event::{AccessKind, AccessMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::store::{ObjectStore, StoreError};
use super::{content_type_for, is_hidden, keep_after_upload, remote_key, UploadError, UploadPolicy, UploadResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub uploaded: u64,
    pub bytes: u64,
    pub retries: u64,
    pub abandoned: Vec<String>,
}

enum Attempt {
    Uploaded(u64),
    Skipped,
}

#[derive(Debug)]
enum Failure {
    /// Modified within the stability window. Rechecked without spending
    /// the retry budget.
    Unstable,
    /// The file cannot be opened or read yet.
    Busy(String),
    Network(StoreError),
}

impl Failure {
    fn delay(&self, policy: &UploadPolicy) -> Duration {
        match self {
            Failure::Unstable | Failure::Busy(_) => policy.busy_retry_delay,
            Failure::Network(_) => policy.network_retry_delay,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Unstable => f.write_str("file still being written"),
            Failure::Busy(reason) => write!(f, "file busy: {reason}"),
            Failure::Network(err) => write!(f, "{err}"),
        }
    }
}

struct Shared {
    root: PathBuf,
    prefix: String,
    store: Arc<dyn ObjectStore>,
    policy: UploadPolicy,
    queue: mpsc::UnboundedSender<UploadTask>,
    cancel: CancellationToken,
    /// Paths queued, waiting for a retry or in flight. `true` marks a change
    /// seen meanwhile that needs another pass.
    active: Mutex<HashMap<PathBuf, bool>>,
    stats: Mutex<UploadStats>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn enqueue_path(&self, path: PathBuf) {
        if self.cancel.is_cancelled() || is_hidden(&self.root, &path) {
            return;
        }
        let Some(key) = remote_key(&self.prefix, &self.root, &path) else {
            return;
        };
        {
            let mut active = locked(&self.active);
            if let Some(dirty) = active.get_mut(&path) {
                *dirty = true;
                return;
            }
            active.insert(path.clone(), false);
        }
        let task = UploadTask {
            local_path: path,
            remote_key: key,
            retry_count: 0,
        };
        if self.queue.send(task).is_err() {
            debug!(root = %self.root.display(), "upload queue closed");
        }
    }

    fn enqueue_existing(&self) {
        for entry in WalkDir::new(&self.root).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file() {
                self.enqueue_path(entry.into_path());
            }
        }
    }

    /// Drops the path from the active set, replaying it once if it changed
    /// while we were busy with it.
    fn finish(&self, path: &Path) {
        let dirty = locked(&self.active).remove(path).unwrap_or(false);
        if dirty {
            self.enqueue_path(path.to_path_buf());
        }
    }

    async fn process(&self, mut task: UploadTask) {
        match self.attempt(&task).await {
            Ok(Attempt::Uploaded(bytes)) => {
                {
                    let mut stats = locked(&self.stats);
                    stats.uploaded += 1;
                    stats.bytes += bytes;
                }
                debug!(key = %task.remote_key, bytes, "uploaded");
                if !keep_after_upload(&task.local_path) {
                    if let Err(err) = tokio::fs::remove_file(&task.local_path).await {
                        if err.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %task.local_path.display(), error = %err, "failed to remove uploaded file");
                        }
                    }
                }
                self.finish(&task.local_path);
            }
            Ok(Attempt::Skipped) => self.finish(&task.local_path),
            Err(failure) if self.cancel.is_cancelled() => {
                debug!(key = %task.remote_key, error = %failure, "upload stopped by shutdown");
                self.finish(&task.local_path);
            }
            Err(Failure::Unstable) => {
                debug!(key = %task.remote_key, "file still being written, waiting");
                if let Some(dirty) = locked(&self.active).get_mut(&task.local_path) {
                    *dirty = false;
                }
                self.schedule_retry(task, self.policy.busy_retry_delay);
            }
            Err(failure) if task.retry_count < self.policy.max_retries => {
                task.retry_count += 1;
                let delay = failure.delay(&self.policy);
                warn!(
                    key = %task.remote_key,
                    attempt = task.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "upload failed, retrying"
                );
                if let Some(dirty) = locked(&self.active).get_mut(&task.local_path) {
                    *dirty = false;
                }
                locked(&self.stats).retries += 1;
                self.schedule_retry(task, delay);
            }
            Err(failure) => {
                error!(
                    path = %task.local_path.display(),
                    key = %task.remote_key,
                    attempts = task.retry_count + 1,
                    error = %failure,
                    "upload abandoned"
                );
                locked(&self.stats).abandoned.push(task.remote_key.clone());
                self.finish(&task.local_path);
            }
        }
    }

    fn schedule_retry(&self, task: UploadTask, delay: Duration) {
        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = queue.send(task);
                }
            }
        });
    }

    async fn attempt(&self, task: &UploadTask) -> Result<Attempt, Failure> {
        let path = &task.local_path;
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Attempt::Skipped),
            Err(err) => return Err(Failure::Busy(err.to_string())),
        };
        if !metadata.is_file() {
            return Ok(Attempt::Skipped);
        }
        if !self.policy.stability.is_zero() {
            let age = match metadata.modified() {
                Ok(modified) => SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or_default(),
                Err(_) => Duration::MAX,
            };
            if age < self.policy.stability {
                return Err(Failure::Unstable);
            }
        }
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Attempt::Skipped),
            Err(err) => return Err(Failure::Busy(err.to_string())),
        };
        let size = body.len() as u64;
        self.store
            .put(&task.remote_key, Bytes::from(body), content_type_for(path))
            .await
            .map_err(Failure::Network)?;
        Ok(Attempt::Uploaded(size))
    }
}

async fn dispatch(shared: Arc<Shared>, mut queue: mpsc::UnboundedReceiver<UploadTask>) {
    let gate = Arc::new(Semaphore::new(shared.policy.concurrency));
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(err) = joined {
                    error!(error = %err, "upload task crashed");
                }
            }
            task = queue.recv() => {
                let Some(task) = task else { break };
                let permit = tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    permit = Arc::clone(&gate).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let worker = Arc::clone(&shared);
                in_flight.spawn(async move {
                    let _permit = permit;
                    worker.process(task).await;
                });
            }
        }
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "upload task crashed");
        }
    }
}

fn watch(shared: &Arc<Shared>) -> UploadResult<RecommendedWatcher> {
    let handler = Arc::clone(shared);
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_)
                        | EventKind::Modify(_)
                        | EventKind::Access(AccessKind::Close(AccessMode::Write))
                );
                if relevant {
                    for path in event.paths {
                        if path.is_file() {
                            handler.enqueue_path(path);
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "filesystem watcher error"),
        },
        Config::default(),
    )
    .map_err(|source| UploadError::Watch {
        source,
        path: shared.root.clone(),
    })?;
    watcher
        .watch(&shared.root, RecursiveMode::Recursive)
        .map_err(|source| UploadError::Watch {
            source,
            path: shared.root.clone(),
        })?;
    Ok(watcher)
}

/// Publishes files under `root` while they are being produced.
pub struct LiveUploader {
    shared: Arc<Shared>,
    watcher: Option<RecommendedWatcher>,
    dispatcher: Option<JoinHandle<()>>,
}

impl LiveUploader {
    /// Starts watching `root` and queues the files already present.
    pub fn start(
        root: impl Into<PathBuf>,
        prefix: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        policy: UploadPolicy,
    ) -> UploadResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(UploadError::Io {
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "output root is not a directory"),
                path: root,
            });
        }
        let (queue, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            root,
            prefix: prefix.into(),
            store,
            policy,
            queue,
            cancel: CancellationToken::new(),
            active: Mutex::new(HashMap::new()),
            stats: Mutex::new(UploadStats::default()),
        });
        let watcher = watch(&shared)?;
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), receiver));
        shared.enqueue_existing();
        info!(
            root = %shared.root.display(),
            prefix = %shared.prefix,
            concurrency = shared.policy.concurrency,
            "live upload started"
        );
        Ok(Self {
            shared,
            watcher: Some(watcher),
            dispatcher: Some(dispatcher),
        })
    }

    /// Queues one file explicitly, as a watcher event would.
    pub fn enqueue(&self, path: impl Into<PathBuf>) {
        self.shared.enqueue_path(path.into());
    }

    pub fn stats(&self) -> UploadStats {
        locked(&self.shared.stats).clone()
    }

    /// Stops watching, discards queued work and waits for transfers already
    /// in flight.
    pub async fn shutdown(mut self) -> UploadStats {
        drop(self.watcher.take());
        self.shared.cancel.cancel();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(err) = dispatcher.await {
                error!(error = %err, "upload dispatcher crashed");
            }
        }
        let stats = self.stats();
        info!(
            uploaded = stats.uploaded,
            bytes = stats.bytes,
            retries = stats.retries,
            abandoned = stats.abandoned.len(),
            "live upload stopped"
        );
        stats
    }
}

impl Drop for LiveUploader {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl fmt::Debug for LiveUploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveUploader")
            .field("root", &self.shared.root)
            .field("prefix", &self.shared.prefix)
            .field("policy", &self.shared.policy)
            .finish()
    }
}
