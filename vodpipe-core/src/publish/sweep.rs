use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use super::store::ObjectStore;
use super::{content_type_for, is_hidden, remote_key, UploadError, UploadPolicy, UploadResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub files: u64,
    pub bytes: u64,
    pub failed: Vec<String>,
}

enum SweepOutcome {
    Uploaded(u64),
    Failed(String),
}

/// Re-uploads every file under `root` unconditionally. Runs only after the
/// live uploader has stopped.
pub async fn final_sweep(
    root: &Path,
    prefix: &str,
    store: Arc<dyn ObjectStore>,
    policy: &UploadPolicy,
) -> UploadResult<SweepReport> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|err| UploadError::Io {
            path: err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
        })?;
        if !entry.file_type().is_file() || is_hidden(root, entry.path()) {
            continue;
        }
        if let Some(key) = remote_key(prefix, root, entry.path()) {
            files.push((entry.into_path(), key));
        }
    }
    info!(root = %root.display(), files = files.len(), "final sweep started");

    let outcomes: Vec<SweepOutcome> = stream::iter(files)
        .map(|(path, key)| {
            let store = Arc::clone(&store);
            async move { upload_with_retries(store.as_ref(), &path, key, policy).await }
        })
        .buffer_unordered(policy.concurrency.max(1))
        .collect()
        .await;

    let mut report = SweepReport::default();
    for outcome in outcomes {
        match outcome {
            SweepOutcome::Uploaded(bytes) => {
                report.files += 1;
                report.bytes += bytes;
            }
            SweepOutcome::Failed(key) => report.failed.push(key),
        }
    }
    report.failed.sort();
    info!(
        files = report.files,
        bytes = report.bytes,
        failed = report.failed.len(),
        "final sweep finished"
    );
    Ok(report)
}

async fn upload_with_retries(
    store: &dyn ObjectStore,
    path: &Path,
    key: String,
    policy: &UploadPolicy,
) -> SweepOutcome {
    let mut attempt = 0;
    loop {
        let result = match tokio::fs::read(path).await {
            Ok(body) => {
                let size = body.len() as u64;
                store
                    .put(&key, Bytes::from(body), content_type_for(path))
                    .await
                    .map(|_| size)
                    .map_err(|err| (err.to_string(), policy.network_retry_delay))
            }
            Err(err) => Err((err.to_string(), policy.busy_retry_delay)),
        };
        match result {
            Ok(size) => return SweepOutcome::Uploaded(size),
            Err((reason, delay)) if attempt < policy.max_retries => {
                attempt += 1;
                warn!(key = %key, attempt, error = %reason, "sweep upload failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err((reason, _)) => {
                error!(path = %path.display(), key = %key, error = %reason, "sweep upload abandoned");
                return SweepOutcome::Failed(key);
            }
        }
    }
}
