//! Dashboard engine: asynchronous operation orchestration for dashboard pages.
//!
//! Debounced, cancellable search requests; single-flight job starts; status
//! polling with exactly-once terminal notifications; cancellable streaming of
//! generated reports.
mod client;
mod debounce;
mod engine;
mod gate;
mod orchestrator;
mod poller;
mod request;
mod sink;
mod stream;
mod sync;
mod types;

pub use client::{ClientSettings, JobClient, ReqwestClient, SearchClient};
pub use debounce::DebounceScheduler;
pub use engine::{EngineError, EngineHandle, EngineSettings};
pub use gate::{SingleFlightGate, StartOutcome, SyncGateState};
pub use orchestrator::{JobOrchestrator, JobSettings, SearchOrchestrator};
pub use poller::{
    JobStatusPoller, JobTransition, PollSession, PollerSettings, StatusSource, TransitionObserver,
};
pub use request::{RequestClass, RequestRegistry, RequestToken, Settled};
pub use sink::{ChannelEventSink, EventSink};
pub use stream::{consume, ResponseBody, StreamOutcome, StreamSession};
pub use types::{
    EngineEvent, FailureKind, JobId, JobSnapshot, JobStatus, ReportSession, RequestError,
    SearchHit, StartAck,
};

pub use tokio_util::sync::CancellationToken;
