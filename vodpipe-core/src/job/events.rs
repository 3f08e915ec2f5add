use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobEvent {
    Start {
        id: String,
        target: String,
        msg: String,
    },
    Info {
        msg: String,
    },
    Log {
        step: String,
        line: String,
    },
    Error {
        msg: String,
    },
    Done {
        msg: String,
        out_root: String,
    },
    Final {
        status: JobStatus,
    },
}

impl JobEvent {
    pub fn info(msg: impl Into<String>) -> Self {
        JobEvent::Info { msg: msg.into() }
    }

    pub fn log(step: impl Into<String>, line: impl Into<String>) -> Self {
        JobEvent::Log {
            step: step.into(),
            line: line.into(),
        }
    }

    /// Status this event leaves the job in, if it ends the job.
    pub fn terminal_status(&self) -> Option<JobStatus> {
        match self {
            JobEvent::Error { .. } => Some(JobStatus::Failed),
            JobEvent::Final { status } => Some(*status),
            _ => None,
        }
    }
}
