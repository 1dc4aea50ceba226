//! Dashboard core: pure page state machine and view-model helpers.
mod effect;
mod msg;
mod state;
mod update;
mod view_model;

pub use effect::Effect;
pub use msg::{Msg, StartReply};
pub use state::{
    JobState, JobStatus, Operation, PageState, ReportSession, ReportState, SearchHit,
};
pub use update::update;
pub use view_model::{prepare_preview, JobView, PageViewModel, MAX_PREVIEW_CHARS};
