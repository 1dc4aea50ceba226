use crate::{JobStatus, ReportSession, SearchHit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Page became visible; start watching its job.
    PageOpened,
    /// User edited the search box.
    SearchInputChanged(String),
    /// User pressed enter in the search box.
    SearchSubmitted,
    SearchResults {
        token: u64,
        query: String,
        result: Result<Vec<SearchHit>, String>,
    },
    StartClicked,
    ResetClicked,
    RefreshClicked,
    GenerateClicked {
        prompt: String,
    },
    CancelGenerationClicked,
    /// Engine answer to a start request.
    StartOutcome(StartReply),
    /// Engine observed a job status change.
    JobTransition {
        status: JobStatus,
        progress: Option<u8>,
        message: Option<String>,
        error: Option<String>,
        is_terminal: bool,
    },
    /// Running job reported new progress without changing status.
    JobProgress {
        progress: Option<u8>,
        message: Option<String>,
    },
    /// Settled result data, already rendered to text.
    ResultFetched(Result<String, String>),
    ResetCompleted(Result<(), String>),
    StreamChunk {
        session: ReportSession,
        partial: String,
    },
    StreamComplete {
        session: ReportSession,
        text: String,
        cancelled: bool,
    },
    StreamFailed {
        session: ReportSession,
        error: String,
    },
    /// UI/render tick to coalesce rendering.
    Tick,
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartReply {
    Started { message: Option<String> },
    AlreadyRunning { message: Option<String> },
    AlreadyPending,
    Rejected(String),
}
