use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::events::{JobEvent, JobStatus};

struct JobEntry {
    target: String,
    events: Vec<JobEvent>,
    listeners: Vec<mpsc::UnboundedSender<JobEvent>>,
    status: JobStatus,
    finished_at: Option<Instant>,
}

/// In-memory event log per job. Subscribers get the full backlog followed
/// by live events; their stream ends after the terminal event.
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobEntry>>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new job and evicts finished jobs past retention.
    pub fn register(&self, target: &str) -> String {
        self.prune(Instant::now());
        let id = Uuid::new_v4().simple().to_string()[..10].to_string();
        self.jobs().insert(
            id.clone(),
            JobEntry {
                target: target.to_string(),
                events: Vec::new(),
                listeners: Vec::new(),
                status: JobStatus::Running,
                finished_at: None,
            },
        );
        id
    }

    /// Appends an event. Returns false for unknown jobs and for jobs that
    /// already ended.
    pub fn push(&self, id: &str, event: JobEvent) -> bool {
        let mut jobs = self.jobs();
        let Some(entry) = jobs.get_mut(id) else {
            return false;
        };
        if entry.status.is_finished() {
            return false;
        }
        entry
            .listeners
            .retain(|listener| listener.send(event.clone()).is_ok());
        if let Some(status) = event.terminal_status() {
            entry.status = status;
            entry.finished_at = Some(Instant::now());
            entry.listeners.clear();
        }
        entry.events.push(event);
        true
    }

    pub fn subscribe(&self, id: &str) -> Option<mpsc::UnboundedReceiver<JobEvent>> {
        let mut jobs = self.jobs();
        let entry = jobs.get_mut(id)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        for event in &entry.events {
            let _ = sender.send(event.clone());
        }
        if !entry.status.is_finished() {
            entry.listeners.push(sender);
        }
        Some(receiver)
    }

    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.jobs().get(id).map(|entry| entry.status)
    }

    pub fn target(&self, id: &str) -> Option<String> {
        self.jobs().get(id).map(|entry| entry.target.clone())
    }

    pub fn events(&self, id: &str) -> Option<Vec<JobEvent>> {
        self.jobs().get(id).map(|entry| entry.events.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops finished jobs older than the retention window.
    pub fn prune(&self, now: Instant) -> usize {
        let retention = self.retention;
        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, entry| match entry.finished_at {
            Some(finished) => now.saturating_duration_since(finished) < retention,
            None => true,
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!(evicted, "evicted finished jobs");
        }
        evicted
    }
}
