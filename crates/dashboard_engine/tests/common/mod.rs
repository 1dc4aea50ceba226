#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use bytes::Bytes;
use dashboard_engine::{
    CancellationToken, EngineEvent, EventSink, FailureKind, JobClient, JobSnapshot, JobStatus,
    JobTransition, RequestError, ResponseBody, SearchClient, SearchHit, StartAck, StatusSource,
    TransitionObserver,
};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(dashboard_logging::initialize_for_tests);
}

pub fn transport_error() -> RequestError {
    RequestError::new(FailureKind::Transport, "connection refused")
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }

    pub fn transitions(&self) -> Vec<JobTransition> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::JobTransition(transition) => Some(transition),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_transitions(&self) -> Vec<JobTransition> {
        self.transitions()
            .into_iter()
            .filter(|transition| transition.is_terminal)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    transitions: Mutex<Vec<JobTransition>>,
    progress: Mutex<Vec<JobSnapshot>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transitions(&self) -> Vec<JobTransition> {
        self.transitions.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<JobSnapshot> {
        self.progress.lock().unwrap().clone()
    }
}

impl TransitionObserver for RecordingObserver {
    fn on_transition(&self, transition: &JobTransition) {
        self.transitions.lock().unwrap().push(transition.clone());
    }

    fn on_progress(&self, _job_id: &str, snapshot: &JobSnapshot) {
        self.progress.lock().unwrap().push(snapshot.clone());
    }
}

/// In-memory job server. Status replies follow a script; once the script is
/// exhausted the last successful snapshot repeats.
#[derive(Default)]
pub struct ScriptedJobClient {
    statuses: Mutex<VecDeque<Result<JobSnapshot, RequestError>>>,
    last_status: Mutex<Option<JobSnapshot>>,
    start_replies: Mutex<VecDeque<Result<StartAck, RequestError>>>,
    reset_replies: Mutex<VecDeque<Result<(), RequestError>>>,
    report_chunks: Mutex<Vec<&'static str>>,
    pub status_delay: Mutex<Duration>,
    pub start_delay: Mutex<Duration>,
    pub chunk_delay: Mutex<Duration>,
    pub result_delay: Mutex<Duration>,
    pub status_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub reset_calls: AtomicUsize,
    pub result_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
    in_flight_status: AtomicUsize,
    pub max_in_flight_status: AtomicUsize,
}

impl ScriptedJobClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_statuses(statuses: &[JobStatus]) -> Arc<Self> {
        let client = Self::default();
        for status in statuses {
            client.push_status(Ok(JobSnapshot::new(*status)));
        }
        Arc::new(client)
    }

    pub fn push_status(&self, reply: Result<JobSnapshot, RequestError>) {
        self.statuses.lock().unwrap().push_back(reply);
    }

    pub fn push_start(&self, reply: Result<StartAck, RequestError>) {
        self.start_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_reset(&self, reply: Result<(), RequestError>) {
        self.reset_replies.lock().unwrap().push_back(reply);
    }

    pub fn set_report(&self, chunks: &[&'static str]) {
        *self.report_chunks.lock().unwrap() = chunks.to_vec();
    }

    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = delay;
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = delay;
    }

    pub fn set_chunk_delay(&self, delay: Duration) {
        *self.chunk_delay.lock().unwrap() = delay;
    }

    pub fn set_result_delay(&self, delay: Duration) {
        *self.result_delay.lock().unwrap() = delay;
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn next_status(&self) -> Result<JobSnapshot, RequestError> {
        let scripted = self.statuses.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(snapshot)) => {
                *self.last_status.lock().unwrap() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(err)) => Err(err),
            None => Ok(self
                .last_status
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_default()),
        }
    }
}

async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), RequestError> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(RequestError::aborted()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[async_trait::async_trait]
impl JobClient for ScriptedJobClient {
    async fn status(
        &self,
        _job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobSnapshot, RequestError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight_status.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight_status.fetch_max(now, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        let paused = pause(delay, cancel).await;
        self.in_flight_status.fetch_sub(1, Ordering::SeqCst);
        paused?;
        self.next_status()
    }

    async fn start(
        &self,
        _job_id: &str,
        _params: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<StartAck, RequestError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.start_delay.lock().unwrap();
        pause(delay, cancel).await?;
        let reply = self.start_replies.lock().unwrap().pop_front();
        reply.unwrap_or_else(|| Ok(StartAck::default()))
    }

    async fn generate(
        &self,
        _job_id: &str,
        _params: &serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<ResponseBody, RequestError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self.report_chunks.lock().unwrap().clone();
        let delay = *self.chunk_delay.lock().unwrap();
        let stream = futures_util::stream::unfold(chunks.into_iter(), move |mut chunks| async move {
            let chunk = chunks.next()?;
            tokio::time::sleep(delay).await;
            Some((Ok(Bytes::from_static(chunk.as_bytes())), chunks))
        });
        Ok(ResponseBody::incremental(stream))
    }

    async fn reset(&self, _job_id: &str, _cancel: &CancellationToken) -> Result<(), RequestError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.reset_replies.lock().unwrap().pop_front();
        reply.unwrap_or(Ok(()))
    }

    async fn result(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, RequestError> {
        let call = self.result_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.result_delay.lock().unwrap();
        pause(delay, cancel).await?;
        Ok(serde_json::json!({ "job": job_id, "fetch": call }))
    }
}

#[async_trait::async_trait]
impl StatusSource for ScriptedJobClient {
    async fn status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobSnapshot, RequestError> {
        JobClient::status(self, job_id, cancel).await
    }
}

/// Search backend answering with one hit per query after a per-query delay.
#[derive(Default)]
pub struct ScriptedSearchClient {
    delays: Mutex<Vec<(String, Duration)>>,
    pub queries: Mutex<Vec<String>>,
    pub failing: Mutex<Vec<String>>,
}

impl ScriptedSearchClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delay_for(&self, query: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .push((query.to_string(), delay));
    }

    pub fn fail_for(&self, query: &str) {
        self.failing.lock().unwrap().push(query.to_string());
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SearchClient for ScriptedSearchClient {
    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, RequestError> {
        self.queries.lock().unwrap().push(query.to_string());
        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(q, _)| q == query)
            .map(|(_, delay)| *delay)
            .unwrap_or(Duration::from_millis(10));
        pause(delay, cancel).await?;
        if self.failing.lock().unwrap().iter().any(|q| q == query) {
            return Err(RequestError::new(FailureKind::HttpStatus(502), "bad gateway"));
        }
        Ok(vec![SearchHit {
            symbol: query.to_uppercase(),
            name: None,
            exchange: None,
        }])
    }
}
