use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use dashboard_core::{Effect, JobStatus, Msg, SearchHit, StartReply};
use dashboard_engine::{EngineEvent, EngineHandle, StartOutcome};
use dashboard_logging::{dash_debug, dash_warn};

/// Carries effects from the page state machine to the engine and engine
/// events back as messages.
pub struct EffectRunner {
    engine: EngineHandle,
}

impl EffectRunner {
    pub fn new(engine: EngineHandle, msg_tx: mpsc::Sender<Msg>) -> Self {
        let runner = Self { engine };
        runner.spawn_event_loop(msg_tx);
        runner
    }

    pub fn enqueue(&self, effects: Vec<Effect>) {
        for effect in effects {
            dash_debug!("effect {:?}", effect);
            match effect {
                Effect::SearchInput { query } => self.engine.search_input(query),
                Effect::SearchNow => self.engine.search_now(),
                Effect::CancelSearch => self.engine.cancel_search(),
                Effect::WatchJob { job_id } => self.engine.watch_job(job_id),
                Effect::StartJob { job_id } => {
                    self.engine.start_job(job_id, serde_json::json!({}))
                }
                Effect::ResetJob { job_id } => self.engine.reset_job(job_id),
                Effect::FetchResult { job_id } => self.engine.fetch_result(job_id),
                Effect::Generate {
                    job_id,
                    session,
                    prompt,
                } => self
                    .engine
                    .generate(job_id, session, serde_json::json!({ "prompt": prompt })),
                Effect::CancelGeneration { job_id } => self.engine.cancel_generation(job_id),
            }
        }
    }

    fn spawn_event_loop(&self, msg_tx: mpsc::Sender<Msg>) {
        let engine = self.engine.clone();
        thread::spawn(move || loop {
            let Some(event) = engine.recv_timeout(Duration::from_millis(100)) else {
                continue;
            };
            if msg_tx.send(map_event(event)).is_err() {
                break;
            }
        });
    }
}

pub fn map_event(event: EngineEvent) -> Msg {
    match event {
        EngineEvent::SearchResults {
            token,
            query,
            result,
        } => Msg::SearchResults {
            token,
            query,
            result: result
                .map(|hits| hits.into_iter().map(map_hit).collect())
                .map_err(|err| err.to_string()),
        },
        EngineEvent::StartOutcome { outcome, .. } => Msg::StartOutcome(match outcome {
            StartOutcome::Accepted {
                already_running: false,
                message,
            } => StartReply::Started { message },
            StartOutcome::Accepted {
                already_running: true,
                message,
            } => StartReply::AlreadyRunning { message },
            StartOutcome::AlreadyPending => StartReply::AlreadyPending,
            StartOutcome::Rejected(err) => StartReply::Rejected(err.to_string()),
        }),
        EngineEvent::JobTransition(transition) => {
            let is_terminal = transition.is_terminal;
            let snapshot = transition.snapshot;
            Msg::JobTransition {
                status: map_status(snapshot.status),
                progress: percent(snapshot.progress),
                message: snapshot.message,
                error: snapshot.error,
                is_terminal,
            }
        }
        EngineEvent::JobProgress { snapshot, .. } => Msg::JobProgress {
            progress: percent(snapshot.progress),
            message: snapshot.message,
        },
        EngineEvent::ResetCompleted { result, .. } => {
            Msg::ResetCompleted(result.map_err(|err| err.to_string()))
        }
        EngineEvent::ResultFetched { result, .. } => Msg::ResultFetched(
            result
                .map(|value| {
                    serde_json::to_string_pretty(&value).unwrap_or_else(|err| {
                        dash_warn!("could not format result: {}", err);
                        value.to_string()
                    })
                })
                .map_err(|err| err.to_string()),
        ),
        EngineEvent::StreamChunk {
            session, partial, ..
        } => Msg::StreamChunk { session, partial },
        EngineEvent::StreamComplete {
            session,
            text,
            cancelled,
            ..
        } => Msg::StreamComplete {
            session,
            text,
            cancelled,
        },
        EngineEvent::StreamFailed { session, error, .. } => Msg::StreamFailed {
            session,
            error: error.to_string(),
        },
    }
}

fn map_status(status: dashboard_engine::JobStatus) -> JobStatus {
    match status {
        dashboard_engine::JobStatus::Idle => JobStatus::Idle,
        dashboard_engine::JobStatus::Running => JobStatus::Running,
        dashboard_engine::JobStatus::Success => JobStatus::Success,
        dashboard_engine::JobStatus::Failed => JobStatus::Failed,
    }
}

fn map_hit(hit: dashboard_engine::SearchHit) -> SearchHit {
    SearchHit {
        symbol: hit.symbol,
        name: hit.name,
        exchange: hit.exchange,
    }
}

fn percent(progress: Option<f64>) -> Option<u8> {
    progress.map(|fraction| (fraction.clamp(0.0, 1.0) * 100.0).round() as u8)
}
