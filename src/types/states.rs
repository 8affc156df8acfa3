/// Lifecycle state of a [`super::job::Job`], reported verbatim by the
/// `jobs` built-in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    Done,
}

impl JobStatus {
    /// The exact text the `jobs` built-in prints for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::Done => "Done",
        }
    }
}
