use std::collections::HashMap;
use std::io;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use dashboard_logging::{dash_debug, dash_info};

use crate::client::{ClientSettings, JobClient, ReqwestClient, SearchClient};
use crate::orchestrator::{JobOrchestrator, JobSettings, SearchOrchestrator};
use crate::sink::{ChannelEventSink, EventSink};
use crate::sync::lock;
use crate::{EngineEvent, JobId, ReportSession, RequestError};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub client: ClientSettings,
    pub search_debounce: Duration,
    pub jobs: JobSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            client: ClientSettings::default(),
            search_debounce: Duration::from_millis(300),
            jobs: JobSettings::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start engine runtime: {0}")]
    Runtime(#[from] io::Error),
    #[error("failed to build http client: {0}")]
    Client(#[from] RequestError),
}

enum EngineCommand {
    SearchInput(String),
    SearchNow,
    CancelSearch,
    WatchJob {
        job_id: JobId,
    },
    StartJob {
        job_id: JobId,
        params: serde_json::Value,
    },
    ResetJob {
        job_id: JobId,
    },
    FetchResult {
        job_id: JobId,
    },
    Generate {
        job_id: JobId,
        session: ReportSession,
        params: serde_json::Value,
    },
    CancelGeneration {
        job_id: JobId,
    },
}

/// Handle to the orchestration engine running on its own thread.
///
/// Commands are fire-and-forget; outcomes come back as [`EngineEvent`]s.
/// Dropping every clone of the handle shuts the engine down.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: Arc<Mutex<mpsc::Receiver<EngineEvent>>>,
}

impl EngineHandle {
    pub fn new(settings: EngineSettings) -> Result<Self, EngineError> {
        let client = Arc::new(ReqwestClient::new(settings.client.clone())?);
        Self::with_client(settings, client).map_err(EngineError::from)
    }

    pub fn with_client<C>(settings: EngineSettings, client: Arc<C>) -> io::Result<Self>
    where
        C: SearchClient + JobClient + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("dashboard-engine-worker")
            .build()?;

        let search_client: Arc<dyn SearchClient> = client.clone();
        let job_client: Arc<dyn JobClient> = client;
        let sink: Arc<dyn EventSink> = Arc::new(ChannelEventSink::new(event_tx));

        thread::Builder::new()
            .name("dashboard-engine".to_string())
            .spawn(move || {
                {
                    let _context = runtime.enter();
                    let mut dispatcher =
                        Dispatcher::new(settings, search_client, job_client, sink);
                    while let Ok(command) = cmd_rx.recv() {
                        dispatcher.handle(command);
                    }
                    dispatcher.shutdown();
                }
                runtime.shutdown_timeout(Duration::from_millis(250));
                dash_debug!("engine thread exited");
            })?;

        Ok(Self {
            cmd_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
        })
    }

    pub fn search_input(&self, query: impl Into<String>) {
        self.send(EngineCommand::SearchInput(query.into()));
    }

    pub fn search_now(&self) {
        self.send(EngineCommand::SearchNow);
    }

    pub fn cancel_search(&self) {
        self.send(EngineCommand::CancelSearch);
    }

    pub fn watch_job(&self, job_id: impl Into<JobId>) {
        self.send(EngineCommand::WatchJob {
            job_id: job_id.into(),
        });
    }

    pub fn start_job(&self, job_id: impl Into<JobId>, params: serde_json::Value) {
        self.send(EngineCommand::StartJob {
            job_id: job_id.into(),
            params,
        });
    }

    pub fn reset_job(&self, job_id: impl Into<JobId>) {
        self.send(EngineCommand::ResetJob {
            job_id: job_id.into(),
        });
    }

    pub fn fetch_result(&self, job_id: impl Into<JobId>) {
        self.send(EngineCommand::FetchResult {
            job_id: job_id.into(),
        });
    }

    pub fn generate(
        &self,
        job_id: impl Into<JobId>,
        session: ReportSession,
        params: serde_json::Value,
    ) {
        self.send(EngineCommand::Generate {
            job_id: job_id.into(),
            session,
            params,
        });
    }

    pub fn cancel_generation(&self, job_id: impl Into<JobId>) {
        self.send(EngineCommand::CancelGeneration {
            job_id: job_id.into(),
        });
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        lock(&self.event_rx).try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        lock(&self.event_rx).recv_timeout(timeout).ok()
    }

    fn send(&self, command: EngineCommand) {
        let _ = self.cmd_tx.send(command);
    }
}

/// Runs on the engine thread inside the tokio runtime context.
struct Dispatcher {
    settings: JobSettings,
    client: Arc<dyn JobClient>,
    sink: Arc<dyn EventSink>,
    search: SearchOrchestrator,
    jobs: HashMap<JobId, Arc<JobOrchestrator>>,
}

impl Dispatcher {
    fn new(
        settings: EngineSettings,
        search_client: Arc<dyn SearchClient>,
        client: Arc<dyn JobClient>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let search =
            SearchOrchestrator::new(search_client, Arc::clone(&sink), settings.search_debounce);
        Self {
            settings: settings.jobs,
            client,
            sink,
            search,
            jobs: HashMap::new(),
        }
    }

    fn job(&mut self, job_id: &str) -> Arc<JobOrchestrator> {
        let entry = self.jobs.entry(job_id.to_string()).or_insert_with(|| {
            dash_info!("orchestrating job {}", job_id);
            Arc::new(JobOrchestrator::new(
                job_id,
                Arc::clone(&self.client),
                Arc::clone(&self.sink),
                self.settings.clone(),
            ))
        });
        Arc::clone(entry)
    }

    fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SearchInput(query) => self.search.input_changed(query),
            EngineCommand::SearchNow => {
                if !self.search.submit() {
                    dash_debug!("search submit with nothing pending");
                }
            }
            EngineCommand::CancelSearch => self.search.cancel(),
            EngineCommand::WatchJob { job_id } => {
                self.job(&job_id).watch();
            }
            EngineCommand::StartJob { job_id, params } => {
                let job = self.job(&job_id);
                tokio::spawn(async move {
                    job.start(params).await;
                });
            }
            EngineCommand::ResetJob { job_id } => {
                let job = self.job(&job_id);
                tokio::spawn(async move {
                    job.reset().await;
                });
            }
            EngineCommand::FetchResult { job_id } => {
                let job = self.job(&job_id);
                tokio::spawn(async move {
                    job.fetch_result().await;
                });
            }
            EngineCommand::Generate {
                job_id,
                session,
                params,
            } => {
                let job = self.job(&job_id);
                tokio::spawn(async move {
                    let _ = job.generate(session, params).await;
                });
            }
            EngineCommand::CancelGeneration { job_id } => {
                if let Some(job) = self.jobs.get(&job_id) {
                    job.cancel_generation();
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.search.cancel();
        for job in self.jobs.values() {
            job.shutdown();
        }
        self.jobs.clear();
    }
}
