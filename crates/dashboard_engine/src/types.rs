use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gate::StartOutcome;
use crate::poller::JobTransition;
use crate::request::RequestToken;

/// Server-side identifier of a logical background job (e.g. "portfolio-report").
pub type JobId = String;

/// Client-chosen number identifying one report generation on a page.
pub type ReportSession = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    #[serde(alias = "pending", alias = "queued", alias = "started")]
    Running,
    #[serde(alias = "done", alias = "complete", alias = "completed")]
    Success,
    #[serde(alias = "error", alias = "failure")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Idle => write!(f, "idle"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One observation of a job's server-side state.
///
/// Snapshots are immutable values: each successful status fetch produces a new
/// one that supersedes the previous.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = normalize_progress(Some(progress));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Parses a status payload. Progress outside `[0, 1]` is clamped; non-finite
    /// progress is dropped.
    pub fn from_json(bytes: &[u8]) -> Result<Self, RequestError> {
        let mut snapshot: JobSnapshot = serde_json::from_slice(bytes)
            .map_err(|err| RequestError::new(FailureKind::Decode, err.to_string()))?;
        snapshot.progress = normalize_progress(snapshot.progress);
        Ok(snapshot)
    }
}

fn normalize_progress(progress: Option<f64>) -> Option<f64> {
    progress
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(0.0, 1.0))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
}

/// Body of a successful start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAck {
    #[serde(default = "accepted_by_default")]
    pub accepted: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl Default for StartAck {
    fn default() -> Self {
        Self {
            accepted: true,
            message: None,
        }
    }
}

fn accepted_by_default() -> bool {
    true
}

/// Notifications delivered to the page controller.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SearchResults {
        token: RequestToken,
        query: String,
        result: Result<Vec<SearchHit>, RequestError>,
    },
    StartOutcome {
        job_id: JobId,
        outcome: StartOutcome,
    },
    JobTransition(JobTransition),
    JobProgress {
        job_id: JobId,
        snapshot: JobSnapshot,
    },
    ResetCompleted {
        job_id: JobId,
        result: Result<(), RequestError>,
    },
    ResultFetched {
        job_id: JobId,
        result: Result<serde_json::Value, RequestError>,
    },
    StreamChunk {
        job_id: JobId,
        session: ReportSession,
        partial: String,
    },
    StreamComplete {
        job_id: JobId,
        session: ReportSession,
        text: String,
        cancelled: bool,
    },
    StreamFailed {
        job_id: JobId,
        session: ReportSession,
        error: RequestError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RequestError {
    pub kind: FailureKind,
    pub message: String,
}

impl RequestError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn aborted() -> Self {
        Self::new(FailureKind::Aborted, "request cancelled")
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == FailureKind::Aborted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Cancelled by the orchestrator itself; never shown to the user.
    Aborted,
    Transport,
    HttpStatus(u16),
    /// 409 on start: the job is already running server-side.
    Conflict,
    Decode,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Aborted => write!(f, "aborted"),
            FailureKind::Transport => write!(f, "network error"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Conflict => write!(f, "already running"),
            FailureKind::Decode => write!(f, "malformed response"),
        }
    }
}
