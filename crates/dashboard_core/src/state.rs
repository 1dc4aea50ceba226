use std::collections::BTreeMap;
use std::fmt;

use crate::view_model::{prepare_preview, JobView, PageViewModel};

pub type ReportSession = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
}

/// Logical operations that each own one error surface on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    Search,
    Job,
    Result,
    Report,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobState {
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub message: Option<String>,
    /// A start was sent and the job has not been seen ending since.
    pub busy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportState {
    pub session: ReportSession,
    pub text: String,
    pub streaming: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageState {
    job_id: String,
    search_input: String,
    searching: bool,
    last_search_token: u64,
    search_results: Vec<SearchHit>,
    job: JobState,
    result: Option<String>,
    report: ReportState,
    notice: Option<String>,
    errors: BTreeMap<Operation, String>,
    dirty: bool,
}

impl PageState {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Self::default()
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job(&self) -> &JobState {
        &self.job
    }

    pub fn report(&self) -> &ReportState {
        &self.report
    }

    pub fn error(&self, operation: Operation) -> Option<&str> {
        self.errors.get(&operation).map(String::as_str)
    }

    pub fn view(&self) -> PageViewModel {
        PageViewModel {
            job_id: self.job_id.clone(),
            search_input: self.search_input.clone(),
            searching: self.searching,
            search_results: self.search_results.clone(),
            job: JobView {
                status: self.job.status,
                progress: self.job.progress,
                message: self.job.message.clone(),
                busy: self.job.busy,
            },
            result_preview: self.result.as_deref().map(prepare_preview),
            report_preview: prepare_preview(&self.report.text),
            report_streaming: self.report.streaming,
            report_cancelled: self.report.cancelled,
            notice: self.notice.clone(),
            errors: self
                .errors
                .iter()
                .map(|(operation, message)| (*operation, message.clone()))
                .collect(),
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn set_error(&mut self, operation: Operation, message: impl Into<String>) {
        self.errors.insert(operation, message.into());
        self.dirty = true;
    }

    pub(crate) fn clear_error(&mut self, operation: Operation) {
        if self.errors.remove(&operation).is_some() {
            self.dirty = true;
        }
    }

    pub(crate) fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
        self.dirty = true;
    }

    pub(crate) fn search_input(&self) -> &str {
        &self.search_input
    }

    pub(crate) fn set_search_input(&mut self, query: String, searching: bool) {
        self.search_input = query;
        self.searching = searching;
        self.dirty = true;
    }

    pub(crate) fn clear_search_results(&mut self) {
        self.search_results.clear();
        self.dirty = true;
    }

    /// Applies search results carrying `token`. Returns false for results
    /// older than the last ones applied, or for a query no longer in the box.
    pub(crate) fn apply_search(
        &mut self,
        token: u64,
        query: &str,
        result: Result<Vec<SearchHit>, String>,
    ) -> bool {
        if token <= self.last_search_token || query != self.search_input {
            return false;
        }
        self.last_search_token = token;
        self.searching = false;
        match result {
            Ok(hits) => {
                self.search_results = hits;
                self.clear_error(Operation::Search);
            }
            Err(message) => self.set_error(Operation::Search, message),
        }
        self.dirty = true;
        true
    }

    pub(crate) fn job_mut(&mut self) -> &mut JobState {
        self.dirty = true;
        &mut self.job
    }

    pub(crate) fn set_result(&mut self, text: String) {
        self.result = Some(text);
        self.dirty = true;
    }

    /// Starts a fresh report session and returns its number.
    pub(crate) fn open_report(&mut self) -> ReportSession {
        let session = self.report.session + 1;
        self.report = ReportState {
            session,
            text: String::new(),
            streaming: true,
            cancelled: false,
        };
        self.dirty = true;
        session
    }

    /// Mutable access to the report if `session` is the one on display.
    pub(crate) fn report_for(&mut self, session: ReportSession) -> Option<&mut ReportState> {
        if self.report.session != session || !self.report.streaming {
            return None;
        }
        self.dirty = true;
        Some(&mut self.report)
    }
}
