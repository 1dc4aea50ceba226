use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use dashboard_logging::{dash_debug, dash_info, dash_warn};
use tokio::time::Instant;

use crate::sync::lock;
use crate::{FailureKind, JobId, RequestError, StartAck};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncGateState {
    pub pending: bool,
    pub accepted_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The job is running server-side. `already_running` distinguishes a run
    /// started elsewhere (HTTP 409) from one this request started.
    Accepted {
        already_running: bool,
        message: Option<String>,
    },
    /// A start for this job is still in flight or its run has not ended; no
    /// request was sent.
    AlreadyPending,
    Rejected(RequestError),
}

impl StartOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, StartOutcome::Accepted { .. })
    }
}

/// Allows at most one start request per job until the job's run ends.
#[derive(Clone, Default)]
pub struct SingleFlightGate {
    jobs: Arc<Mutex<HashMap<JobId, SyncGateState>>>,
}

impl SingleFlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the gate for `job_id` and runs `start` unless a claim is already
    /// held.
    ///
    /// On acceptance the claim is kept until [`SingleFlightGate::release`] is
    /// called (normally when the status poller reports the end of the run). On
    /// rejection it is released before returning.
    pub async fn try_start<F, Fut>(&self, job_id: &str, start: F) -> StartOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StartAck, RequestError>>,
    {
        {
            let mut jobs = lock(&self.jobs);
            let state = jobs.entry(job_id.to_string()).or_default();
            if state.pending {
                dash_debug!("start for {} ignored: already pending", job_id);
                return StartOutcome::AlreadyPending;
            }
            state.pending = true;
            state.accepted_at = None;
        }

        match start().await {
            Ok(ack) if ack.accepted => {
                self.mark_accepted(job_id);
                dash_info!("job {} started", job_id);
                StartOutcome::Accepted {
                    already_running: false,
                    message: ack.message,
                }
            }
            Ok(ack) => {
                self.release(job_id);
                let message = ack
                    .message
                    .unwrap_or_else(|| "start request was not accepted".to_string());
                dash_warn!("job {} start declined: {}", job_id, message);
                StartOutcome::Rejected(RequestError::new(FailureKind::HttpStatus(200), message))
            }
            Err(err) if err.kind == FailureKind::Conflict => {
                self.mark_accepted(job_id);
                dash_info!("job {} already running: {}", job_id, err.message);
                let message = (!err.message.is_empty()).then_some(err.message);
                StartOutcome::Accepted {
                    already_running: true,
                    message,
                }
            }
            Err(err) => {
                self.release(job_id);
                if !err.is_aborted() {
                    dash_warn!("job {} start failed: {}", job_id, err);
                }
                StartOutcome::Rejected(err)
            }
        }
    }

    /// Clears the claim for `job_id`. Returns whether it was pending.
    pub fn release(&self, job_id: &str) -> bool {
        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(job_id) {
            Some(state) if state.pending => {
                *state = SyncGateState::default();
                dash_debug!("gate for {} released", job_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, job_id: &str) -> bool {
        self.state(job_id).pending
    }

    pub fn state(&self, job_id: &str) -> SyncGateState {
        lock(&self.jobs).get(job_id).copied().unwrap_or_default()
    }

    fn mark_accepted(&self, job_id: &str) {
        if let Some(state) = lock(&self.jobs).get_mut(job_id) {
            if state.pending {
                state.accepted_at = Some(Instant::now());
            }
        }
    }
}
