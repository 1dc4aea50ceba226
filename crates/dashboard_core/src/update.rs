use crate::{Effect, JobStatus, Msg, Operation, PageState, StartReply};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: PageState, msg: Msg) -> (PageState, Vec<Effect>) {
    let job_id = state.job_id().to_string();
    let effects = match msg {
        Msg::PageOpened => vec![
            Effect::WatchJob {
                job_id: job_id.clone(),
            },
            Effect::FetchResult { job_id },
        ],
        Msg::SearchInputChanged(raw) => {
            let query = raw.trim().to_string();
            if query == state.search_input() {
                return (state, Vec::new());
            }
            if query.is_empty() {
                state.set_search_input(query, false);
                state.clear_search_results();
                state.clear_error(Operation::Search);
                vec![Effect::CancelSearch]
            } else {
                state.set_search_input(query.clone(), true);
                vec![Effect::SearchInput { query }]
            }
        }
        Msg::SearchSubmitted => {
            if state.search_input().is_empty() {
                Vec::new()
            } else {
                vec![Effect::SearchNow]
            }
        }
        Msg::SearchResults {
            token,
            query,
            result,
        } => {
            state.apply_search(token, &query, result);
            Vec::new()
        }
        Msg::StartClicked => vec![Effect::StartJob { job_id }],
        Msg::ResetClicked => vec![Effect::ResetJob { job_id }],
        Msg::RefreshClicked => vec![Effect::FetchResult { job_id }],
        Msg::StartOutcome(reply) => {
            apply_start_reply(&mut state, reply);
            Vec::new()
        }
        Msg::JobTransition {
            status,
            progress,
            message,
            error,
            is_terminal,
        } => {
            let job = state.job_mut();
            job.status = status;
            job.progress = progress;
            job.message = message;
            job.busy = status == JobStatus::Running;
            match status {
                JobStatus::Failed => {
                    state.set_error(Operation::Job, error.unwrap_or_else(|| "Job failed".to_string()))
                }
                JobStatus::Success => state.clear_error(Operation::Job),
                JobStatus::Idle | JobStatus::Running => {}
            }
            if is_terminal {
                state.set_notice(format!("Job finished: {status}"));
                vec![Effect::FetchResult { job_id }]
            } else {
                Vec::new()
            }
        }
        Msg::JobProgress { progress, message } => {
            let job = state.job_mut();
            job.progress = progress;
            if message.is_some() {
                job.message = message;
            }
            Vec::new()
        }
        Msg::ResultFetched(result) => {
            match result {
                Ok(text) => {
                    state.set_result(text);
                    state.clear_error(Operation::Result);
                }
                Err(message) => state.set_error(Operation::Result, message),
            }
            Vec::new()
        }
        Msg::ResetCompleted(result) => {
            match result {
                Ok(()) => {
                    state.clear_error(Operation::Job);
                    state.set_notice("Reset requested");
                }
                Err(message) => state.set_error(Operation::Job, message),
            }
            Vec::new()
        }
        Msg::GenerateClicked { prompt } => {
            let prompt = prompt.trim().to_string();
            if prompt.is_empty() {
                return (state, Vec::new());
            }
            let session = state.open_report();
            state.clear_error(Operation::Report);
            vec![Effect::Generate {
                job_id,
                session,
                prompt,
            }]
        }
        Msg::CancelGenerationClicked => {
            if state.report().streaming {
                vec![Effect::CancelGeneration { job_id }]
            } else {
                Vec::new()
            }
        }
        Msg::StreamChunk { session, partial } => {
            if let Some(report) = state.report_for(session) {
                report.text = partial;
            }
            Vec::new()
        }
        Msg::StreamComplete {
            session,
            text,
            cancelled,
        } => {
            if let Some(report) = state.report_for(session) {
                // An abort before the body arrived reports no text; keep what
                // was already shown.
                if !(cancelled && text.is_empty()) {
                    report.text = text;
                }
                report.streaming = false;
                report.cancelled = cancelled;
            }
            Vec::new()
        }
        Msg::StreamFailed { session, error } => {
            if let Some(report) = state.report_for(session) {
                report.streaming = false;
                state.set_error(Operation::Report, error);
            }
            Vec::new()
        }
        Msg::Tick | Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn apply_start_reply(state: &mut PageState, reply: StartReply) {
    match reply {
        StartReply::Started { message } => {
            state.job_mut().busy = true;
            state.clear_error(Operation::Job);
            state.set_notice(message.unwrap_or_else(|| "Job started".to_string()));
        }
        StartReply::AlreadyRunning { message } => {
            state.job_mut().busy = true;
            state.clear_error(Operation::Job);
            let notice = match message {
                Some(message) => format!("Job already running: {message}"),
                None => "Job already running".to_string(),
            };
            state.set_notice(notice);
        }
        StartReply::AlreadyPending => {}
        StartReply::Rejected(message) => {
            state.job_mut().busy = false;
            state.set_error(Operation::Job, message);
        }
    }
}
