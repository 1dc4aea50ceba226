use crate::ReportSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SearchInput { query: String },
    SearchNow,
    CancelSearch,
    WatchJob { job_id: String },
    StartJob { job_id: String },
    ResetJob { job_id: String },
    FetchResult { job_id: String },
    Generate {
        job_id: String,
        session: ReportSession,
        prompt: String,
    },
    CancelGeneration { job_id: String },
}
