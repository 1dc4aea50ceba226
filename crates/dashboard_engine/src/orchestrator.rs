use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashboard_logging::{dash_debug, dash_warn};
use tokio_util::sync::CancellationToken;

use crate::client::{JobClient, SearchClient};
use crate::debounce::DebounceScheduler;
use crate::gate::{SingleFlightGate, StartOutcome};
use crate::poller::{
    JobStatusPoller, JobTransition, PollerSettings, StatusSource, TransitionObserver,
};
use crate::request::{RequestClass, RequestRegistry, Settled};
use crate::sink::EventSink;
use crate::stream::{self, StreamOutcome};
use crate::sync::lock;
use crate::{EngineEvent, JobId, JobSnapshot, JobStatus, ReportSession, RequestError};

const RESET: RequestClass = RequestClass::new("reset");

/// Type-ahead search for one page: debounced input, cancellable requests,
/// stale responses dropped.
pub struct SearchOrchestrator {
    client: Arc<dyn SearchClient>,
    sink: Arc<dyn EventSink>,
    requests: RequestRegistry,
    debounce: DebounceScheduler<RequestClass>,
    delay: Duration,
}

impl SearchOrchestrator {
    pub fn new(client: Arc<dyn SearchClient>, sink: Arc<dyn EventSink>, delay: Duration) -> Self {
        Self {
            client,
            sink,
            requests: RequestRegistry::new(),
            debounce: DebounceScheduler::new(),
            delay,
        }
    }

    /// Schedules a search for `query` once input has been quiet for the
    /// debounce window.
    pub fn input_changed(&self, query: impl Into<String>) {
        let query = query.into();
        let client = Arc::clone(&self.client);
        let sink = Arc::clone(&self.sink);
        let requests = self.requests.clone();
        self.debounce.schedule(RequestClass::SEARCH, self.delay, move || {
            tokio::spawn(run_search(client, sink, requests, query));
        });
    }

    /// Fires the pending search immediately. Returns false when there was
    /// nothing waiting (the latest input was already searched).
    pub fn submit(&self) -> bool {
        self.debounce.flush_now(&RequestClass::SEARCH)
    }

    /// Drops the pending search and aborts the one in flight.
    pub fn cancel(&self) {
        self.debounce.cancel(&RequestClass::SEARCH);
        self.requests.cancel(RequestClass::SEARCH);
    }

    pub fn is_pending(&self) -> bool {
        self.debounce.is_pending(&RequestClass::SEARCH)
    }
}

async fn run_search(
    client: Arc<dyn SearchClient>,
    sink: Arc<dyn EventSink>,
    requests: RequestRegistry,
    query: String,
) {
    let term = query.clone();
    let settled = requests
        .issue(RequestClass::SEARCH, move |cancel| async move {
            client.search(&term, &cancel).await
        })
        .await;
    let (token, result) = match settled {
        Settled::Current { token, value } => (token, Ok(value)),
        Settled::Failed { token, error } => {
            dash_warn!("search for {:?} failed: {}", query, error);
            (token, Err(error))
        }
        Settled::Stale { .. } | Settled::Aborted { .. } => return,
    };
    sink.emit(EngineEvent::SearchResults {
        token,
        query,
        result,
    });
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub poller: PollerSettings,
    /// Stop polling once the run has ended (terminal transition or reset to
    /// idle). The poller restarts on the next accepted start or reset.
    pub stop_polling_on_terminal: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            poller: PollerSettings::default(),
            stop_polling_on_terminal: false,
        }
    }
}

struct ClientStatusSource(Arc<dyn JobClient>);

#[async_trait::async_trait]
impl StatusSource for ClientStatusSource {
    async fn status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobSnapshot, RequestError> {
        self.0.status(job_id, cancel).await
    }
}

/// Reacts to poller transitions: releases the start gate when a run ends and
/// forwards the transition to the page.
struct JobWatch {
    gate: SingleFlightGate,
    poller: JobStatusPoller,
    sink: Arc<dyn EventSink>,
    stop_on_terminal: bool,
}

impl TransitionObserver for JobWatch {
    fn on_transition(&self, transition: &JobTransition) {
        let run_ended = transition.is_terminal || transition.to() == JobStatus::Idle;
        if run_ended {
            // Release before notifying so a restart triggered by the
            // notification is not blocked.
            self.gate.release(&transition.job_id);
        }
        self.sink.emit(EngineEvent::JobTransition(transition.clone()));
        if run_ended && self.stop_on_terminal {
            self.poller.stop();
        }
    }

    fn on_progress(&self, job_id: &str, snapshot: &JobSnapshot) {
        self.sink.emit(EngineEvent::JobProgress {
            job_id: job_id.to_string(),
            snapshot: snapshot.clone(),
        });
    }
}

/// Owns every orchestration component of one logical job on a page.
pub struct JobOrchestrator {
    job_id: JobId,
    client: Arc<dyn JobClient>,
    sink: Arc<dyn EventSink>,
    gate: SingleFlightGate,
    poller: JobStatusPoller,
    watch: Arc<JobWatch>,
    requests: RequestRegistry,
    generation: Mutex<Option<(ReportSession, CancellationToken)>>,
    lifetime: CancellationToken,
}

impl JobOrchestrator {
    pub fn new(
        job_id: impl Into<JobId>,
        client: Arc<dyn JobClient>,
        sink: Arc<dyn EventSink>,
        settings: JobSettings,
    ) -> Self {
        let job_id = job_id.into();
        let gate = SingleFlightGate::new();
        let poller = JobStatusPoller::new(job_id.clone(), settings.poller);
        let watch = Arc::new(JobWatch {
            gate: gate.clone(),
            poller: poller.clone(),
            sink: Arc::clone(&sink),
            stop_on_terminal: settings.stop_polling_on_terminal,
        });
        Self {
            job_id,
            client,
            sink,
            gate,
            poller,
            watch,
            requests: RequestRegistry::new(),
            generation: Mutex::new(None),
            lifetime: CancellationToken::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn gate(&self) -> &SingleFlightGate {
        &self.gate
    }

    pub fn poller(&self) -> &JobStatusPoller {
        &self.poller
    }

    /// Starts status polling. Idempotent.
    pub fn watch(&self) -> bool {
        if self.lifetime.is_cancelled() {
            return false;
        }
        let source: Arc<dyn StatusSource> =
            Arc::new(ClientStatusSource(Arc::clone(&self.client)));
        let observer: Arc<dyn TransitionObserver> = self.watch.clone();
        self.poller.start(source, observer)
    }

    pub fn unwatch(&self) -> bool {
        self.poller.stop()
    }

    /// Requests a new run unless one is already pending. An accepted start
    /// (including "already running") arms the poller and makes sure it runs.
    pub async fn start(&self, params: serde_json::Value) -> StartOutcome {
        let client = Arc::clone(&self.client);
        let job_id = self.job_id.clone();
        let cancel = self.lifetime.child_token();
        let outcome = self
            .gate
            .try_start(&self.job_id, move || async move {
                client.start(&job_id, &params, &cancel).await
            })
            .await;

        if outcome.is_accepted() {
            self.poller.expect_run();
            self.watch();
        }
        match &outcome {
            StartOutcome::Rejected(err) if err.is_aborted() => {}
            _ => self.sink.emit(EngineEvent::StartOutcome {
                job_id: self.job_id.clone(),
                outcome: outcome.clone(),
            }),
        }
        outcome
    }

    /// Asks the server to clear the job's running state. The gate is released
    /// on the next idle snapshot, even if the job never left idle, so polling
    /// is (re)started here.
    pub async fn reset(&self) -> Settled<()> {
        let client = Arc::clone(&self.client);
        let job_id = self.job_id.clone();
        let lifetime = self.lifetime.clone();
        let settled = self
            .requests
            .issue(RESET, move |cancel| async move {
                tokio::select! {
                    biased;
                    _ = lifetime.cancelled() => Err(RequestError::aborted()),
                    result = client.reset(&job_id, &cancel) => result,
                }
            })
            .await;
        let result = match &settled {
            Settled::Current { .. } => {
                self.poller.expect_idle();
                self.watch();
                Ok(())
            }
            Settled::Failed { error, .. } => Err(error.clone()),
            Settled::Stale { .. } | Settled::Aborted { .. } => return settled,
        };
        self.sink.emit(EngineEvent::ResetCompleted {
            job_id: self.job_id.clone(),
            result,
        });
        settled
    }

    /// Fetches the settled result data. Overlapping fetches supersede each
    /// other; only the latest is delivered.
    pub async fn fetch_result(&self) -> Settled<serde_json::Value> {
        let client = Arc::clone(&self.client);
        let job_id = self.job_id.clone();
        let lifetime = self.lifetime.clone();
        let settled = self
            .requests
            .issue(RequestClass::RESULT, move |cancel| async move {
                tokio::select! {
                    biased;
                    _ = lifetime.cancelled() => Err(RequestError::aborted()),
                    result = client.result(&job_id, &cancel) => result,
                }
            })
            .await;
        let result = match &settled {
            Settled::Current { value, .. } => Ok(value.clone()),
            Settled::Failed { error, .. } => Err(error.clone()),
            Settled::Stale { .. } | Settled::Aborted { .. } => return settled,
        };
        self.sink.emit(EngineEvent::ResultFetched {
            job_id: self.job_id.clone(),
            result,
        });
        settled
    }

    /// Streams a generated report. A generation still running is cancelled
    /// first; each call reads into a fresh session.
    pub async fn generate(
        &self,
        session: ReportSession,
        params: serde_json::Value,
    ) -> Result<StreamOutcome, RequestError> {
        let cancel = self.lifetime.child_token();
        if let Some((previous_session, previous)) =
            lock(&self.generation).replace((session, cancel.clone()))
        {
            dash_debug!(
                "report session {} superseded by {} for {}",
                previous_session,
                session,
                self.job_id
            );
            previous.cancel();
        }

        let result = self.read_report(session, &params, &cancel).await;

        {
            let mut current = lock(&self.generation);
            if matches!(current.as_ref(), Some((active, _)) if *active == session) {
                *current = None;
            }
        }

        let job_id = self.job_id.clone();
        match &result {
            Ok(outcome) => self.sink.emit(EngineEvent::StreamComplete {
                job_id,
                session,
                text: outcome.text.clone(),
                cancelled: outcome.cancelled,
            }),
            Err(err) if err.is_aborted() => self.sink.emit(EngineEvent::StreamComplete {
                job_id,
                session,
                text: String::new(),
                cancelled: true,
            }),
            Err(err) => {
                dash_warn!("report for {} failed: {}", self.job_id, err);
                self.sink.emit(EngineEvent::StreamFailed {
                    job_id,
                    session,
                    error: err.clone(),
                });
            }
        }
        result
    }

    /// Cancels the generation in progress. Returns whether one was running.
    pub fn cancel_generation(&self) -> bool {
        match lock(&self.generation).take() {
            Some((_, cancel)) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Tears everything down: polling, in-flight requests, report streams.
    pub fn shutdown(&self) {
        self.lifetime.cancel();
        self.poller.stop();
        self.requests.cancel_all();
        self.cancel_generation();
    }

    async fn read_report(
        &self,
        session: ReportSession,
        params: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, RequestError> {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RequestError::aborted()),
            body = self.client.generate(&self.job_id, params, cancel) => body?,
        };
        stream::consume(
            body,
            |partial| {
                self.sink.emit(EngineEvent::StreamChunk {
                    job_id: self.job_id.clone(),
                    session,
                    partial: partial.to_string(),
                })
            },
            cancel,
        )
        .await
    }
}

impl Drop for JobOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
