use std::fmt::Write;

use chrono::Local;
use dashboard_core::{JobStatus, Operation, PageViewModel};

const MAX_LISTED_HITS: usize = 8;

/// Renders the page as a block of text with a timestamped header.
pub fn render(view: &PageViewModel) -> String {
    let header = format!(
        "=== {} @ {} ===\n",
        view.job_id,
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    header + &render_body(view)
}

pub fn render_body(view: &PageViewModel) -> String {
    let mut out = String::new();

    let search_state = if view.searching { " (searching…)" } else { "" };
    let _ = writeln!(out, "Search: {:?}{}", view.search_input, search_state);
    for hit in view.search_results.iter().take(MAX_LISTED_HITS) {
        let name = hit.name.as_deref().unwrap_or("");
        match hit.exchange.as_deref() {
            Some(exchange) => {
                let _ = writeln!(out, "  {:<8} {} [{}]", hit.symbol, name, exchange);
            }
            None => {
                let _ = writeln!(out, "  {:<8} {}", hit.symbol, name);
            }
        }
    }
    if view.search_results.len() > MAX_LISTED_HITS {
        let _ = writeln!(
            out,
            "  … {} more",
            view.search_results.len() - MAX_LISTED_HITS
        );
    }

    let _ = write!(out, "Job: {}", status_label(view.job.status));
    if let Some(progress) = view.job.progress {
        let _ = write!(out, " {progress}%");
    }
    if let Some(message) = &view.job.message {
        let _ = write!(out, " - {message}");
    }
    if view.job.busy {
        let _ = write!(out, " [busy]");
    }
    out.push('\n');

    if let Some(notice) = &view.notice {
        let _ = writeln!(out, "Notice: {notice}");
    }

    match &view.result_preview {
        Some(result) => {
            let _ = writeln!(out, "Result:\n{result}");
        }
        None => out.push_str("Result: (none)\n"),
    }

    if !view.report_preview.is_empty() || view.report_streaming {
        let state = if view.report_streaming {
            " (streaming…)"
        } else if view.report_cancelled {
            " (cancelled)"
        } else {
            ""
        };
        let _ = writeln!(out, "Report{}:\n{}", state, view.report_preview);
    }

    for (operation, message) in &view.errors {
        let _ = writeln!(out, "Error [{}]: {}", operation_label(*operation), message);
    }
    out
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Idle => "Idle",
        JobStatus::Running => "Running",
        JobStatus::Success => "Success",
        JobStatus::Failed => "Failed",
    }
}

fn operation_label(operation: Operation) -> &'static str {
    match operation {
        Operation::Search => "search",
        Operation::Job => "job",
        Operation::Result => "result",
        Operation::Report => "report",
    }
}
