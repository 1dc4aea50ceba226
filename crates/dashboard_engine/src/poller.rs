use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashboard_logging::{dash_debug, dash_error, dash_info, dash_warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::sync::lock;
use crate::{JobId, JobSnapshot, JobStatus, RequestError};

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    /// Consecutive failed ticks after which the session deactivates itself.
    /// `None` keeps polling through any number of failures.
    pub failure_limit: Option<u32>,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            failure_limit: None,
        }
    }
}

#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobSnapshot, RequestError>;
}

pub trait TransitionObserver: Send + Sync {
    /// Called once per observed status change.
    fn on_transition(&self, transition: &JobTransition);

    /// Called when a running job reports new progress or message text without
    /// changing status.
    fn on_progress(&self, _job_id: &str, _snapshot: &JobSnapshot) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobTransition {
    pub job_id: JobId,
    pub from: JobStatus,
    pub snapshot: JobSnapshot,
    /// True for the single change that ends a run.
    pub is_terminal: bool,
}

impl JobTransition {
    pub fn to(&self) -> JobStatus {
        self.snapshot.status
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollSession {
    pub interval: Duration,
    pub active: bool,
    pub last_status: JobStatus,
    armed: bool,
    release_on_idle: bool,
    last_snapshot: Option<JobSnapshot>,
    consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Observation {
    Unchanged,
    Progress,
    Transition { from: JobStatus, is_terminal: bool },
}

impl PollSession {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: false,
            last_status: JobStatus::Idle,
            armed: false,
            release_on_idle: false,
            last_snapshot: None,
            consecutive_failures: 0,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn awaits_idle(&self) -> bool {
        self.release_on_idle
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn observe(&mut self, snapshot: &JobSnapshot) -> Observation {
        self.consecutive_failures = 0;
        let changed = self.last_snapshot.as_ref() != Some(snapshot);
        self.last_snapshot = Some(snapshot.clone());

        let from = self.last_status;
        let to = snapshot.status;
        self.last_status = to;

        // After a reset the first idle snapshot counts, even without a change.
        if to == JobStatus::Idle && self.release_on_idle {
            self.release_on_idle = false;
            return Observation::Transition {
                from,
                is_terminal: false,
            };
        }
        // A requested run may start and finish between two ticks, possibly
        // landing on the status the previous run ended with.
        if self.armed && to.is_terminal() {
            self.armed = false;
            return Observation::Transition {
                from,
                is_terminal: true,
            };
        }
        if to == JobStatus::Running {
            self.armed = false;
        }

        if from == to {
            return if changed && to == JobStatus::Running {
                Observation::Progress
            } else {
                Observation::Unchanged
            };
        }
        Observation::Transition {
            from,
            is_terminal: to.is_terminal() && from == JobStatus::Running,
        }
    }

    /// Returns true once the failure limit is reached.
    pub(crate) fn record_failure(&mut self, limit: Option<u32>) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        limit.is_some_and(|limit| self.consecutive_failures >= limit)
    }
}

struct PollerState {
    session: PollSession,
    stop: Option<CancellationToken>,
}

struct PollerShared {
    job_id: JobId,
    failure_limit: Option<u32>,
    state: Mutex<PollerState>,
}

/// Fixed-interval status poller for one job.
///
/// Cloning yields another handle to the same poller.
#[derive(Clone)]
pub struct JobStatusPoller {
    shared: Arc<PollerShared>,
}

impl JobStatusPoller {
    pub fn new(job_id: impl Into<JobId>, settings: PollerSettings) -> Self {
        Self {
            shared: Arc::new(PollerShared {
                job_id: job_id.into(),
                failure_limit: settings.failure_limit,
                state: Mutex::new(PollerState {
                    session: PollSession::new(settings.interval),
                    stop: None,
                }),
            }),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.shared.job_id
    }

    /// Starts ticking; the first tick fires immediately. Returns false if the
    /// poller was already active.
    pub fn start(
        &self,
        source: Arc<dyn StatusSource>,
        observer: Arc<dyn TransitionObserver>,
    ) -> bool {
        let stop = {
            let mut state = lock(&self.shared.state);
            if state.session.active {
                return false;
            }
            state.session.active = true;
            let stop = CancellationToken::new();
            state.stop = Some(stop.clone());
            stop
        };
        dash_debug!("status poller for {} started", self.shared.job_id);
        tokio::spawn(run(Arc::clone(&self.shared), source, observer, stop));
        true
    }

    /// Stops ticking and aborts an in-flight status fetch. Returns false if the
    /// poller was not active.
    pub fn stop(&self) -> bool {
        let mut state = lock(&self.shared.state);
        if !state.session.active {
            return false;
        }
        state.session.active = false;
        if let Some(stop) = state.stop.take() {
            stop.cancel();
        }
        dash_debug!("status poller for {} stopped", self.shared.job_id);
        true
    }

    /// Tells the poller a run was just requested. The next terminal snapshot
    /// ends that run, even when the job completed between two ticks and the
    /// status never visibly changed.
    pub fn expect_run(&self) {
        let mut state = lock(&self.shared.state);
        state.session.armed = true;
        state.session.release_on_idle = false;
    }

    /// Tells the poller a reset was accepted. The next idle snapshot is
    /// reported as a transition even if the job already looked idle.
    pub fn expect_idle(&self) {
        let mut state = lock(&self.shared.state);
        state.session.armed = false;
        state.session.release_on_idle = true;
    }

    pub fn is_active(&self) -> bool {
        lock(&self.shared.state).session.active
    }

    pub fn session(&self) -> PollSession {
        lock(&self.shared.state).session.clone()
    }
}

async fn run(
    shared: Arc<PollerShared>,
    source: Arc<dyn StatusSource>,
    observer: Arc<dyn TransitionObserver>,
    stop: CancellationToken,
) {
    let interval = lock(&shared.state).session.interval;
    let mut ticker = tokio::time::interval(interval);
    // A slow fetch pushes the schedule back instead of bursting ticks.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            result = source.status(&shared.job_id, &stop) => result,
        };

        match fetched {
            Ok(snapshot) => {
                let observation = {
                    let mut state = lock(&shared.state);
                    if stop.is_cancelled() {
                        break;
                    }
                    state.session.observe(&snapshot)
                };
                match observation {
                    Observation::Unchanged => {}
                    Observation::Progress => observer.on_progress(&shared.job_id, &snapshot),
                    Observation::Transition { from, is_terminal } => {
                        dash_info!(
                            "job {} {} -> {}{}",
                            shared.job_id,
                            from,
                            snapshot.status,
                            if is_terminal { " (terminal)" } else { "" }
                        );
                        observer.on_transition(&JobTransition {
                            job_id: shared.job_id.clone(),
                            from,
                            snapshot,
                            is_terminal,
                        });
                    }
                }
            }
            Err(err) if err.is_aborted() => {
                dash_debug!("status poll for {} aborted", shared.job_id);
            }
            Err(err) => {
                dash_warn!("status poll for {} failed: {}", shared.job_id, err);
                let mut state = lock(&shared.state);
                if stop.is_cancelled() {
                    break;
                }
                if state.session.record_failure(shared.failure_limit) {
                    dash_error!(
                        "status poller for {} giving up after {} consecutive failures",
                        shared.job_id,
                        state.session.consecutive_failures
                    );
                    state.session.active = false;
                    state.stop = None;
                    stop.cancel();
                    break;
                }
            }
        }
    }
}
