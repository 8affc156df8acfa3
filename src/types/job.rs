use nix::unistd::Pid;

use super::states::JobStatus;
use crate::limits;

/// One side of a job: either the whole command (non-piped) or one half of a
/// pipe, together with whatever redirections apply to that side.
#[derive(Debug, Clone, Default)]
pub struct Side {
    pub argv: Vec<String>,
    pub in_path: Option<String>,
    pub out_path: Option<String>,
    pub err_path: Option<String>,
}

impl Side {
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }
}

/// A single parsed and (possibly) running job, as tracked in a connection's
/// [`super::jobs_table::JobsTable`].
#[derive(Debug)]
pub struct Job {
    /// The raw command line as received from the client, capped at
    /// [`limits::MAX_CMD_LEN`].
    pub raw: String,
    /// Whitespace-separated tokens of `raw`, capped at [`limits::MAX_TOKENS`].
    pub tokens: Vec<String>,
    pub left: Side,
    pub right: Option<Side>,
    pub background: bool,
    /// The process group id of the job once it has been launched.
    pub gpid: Option<Pid>,
    /// How many processes make up the group once launched (1, or 2 for a
    /// pipeline whose right-hand side launched successfully); used to poll
    /// the group's status without needing the executor's own `Child` handles.
    pub child_count: usize,
    pub status: JobStatus,
    /// Set to `Some` the first time the job fails to parse, redirect, or
    /// exec; carries the exact client-visible error text.
    pub error: Option<String>,
}

impl Job {
    pub fn new(raw: String) -> Self {
        Job {
            raw,
            tokens: Vec::new(),
            left: Side::default(),
            right: None,
            background: false,
            gpid: None,
            child_count: 0,
            status: JobStatus::Running,
            error: None,
        }
    }

    pub fn is_piped(&self) -> bool {
        self.right.is_some()
    }

    pub fn fits_limits(&self) -> bool {
        self.raw.len() <= limits::MAX_CMD_LEN && self.tokens.len() <= limits::MAX_TOKENS
    }
}
