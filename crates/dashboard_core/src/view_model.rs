use crate::{JobStatus, Operation, SearchHit};

const TRUNCATED_MARKER: &str = "\n.[truncated]";
pub const MAX_PREVIEW_CHARS: usize = 4_096;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageViewModel {
    pub job_id: String,
    pub search_input: String,
    pub searching: bool,
    pub search_results: Vec<SearchHit>,
    pub job: JobView,
    pub result_preview: Option<String>,
    pub report_preview: String,
    pub report_streaming: bool,
    pub report_cancelled: bool,
    pub notice: Option<String>,
    pub errors: Vec<(Operation, String)>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobView {
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub busy: bool,
}

/// Cuts `text` to at most [`MAX_PREVIEW_CHARS`] bytes on a char boundary and
/// appends a marker when anything was dropped.
pub fn prepare_preview(text: &str) -> String {
    if text.len() <= MAX_PREVIEW_CHARS {
        return text.to_string();
    }
    let mut end = MAX_PREVIEW_CHARS;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATED_MARKER}", &text[..end])
}
