//! Per-connection shell state and the built-in commands (`jobs`, `bg`,
//! `fg`), grounded on `shell.c`'s `runShellCmd`/`jobsExec`/`bgExec`/
//! `fgExec` and the `startJob`/`handleNewJob` admission logic.

use std::os::unix::io::RawFd;

use tokio::sync::mpsc;

use crate::executor::{self, Launched};
use crate::job_task::{self, ForegroundOutcome, JobEvent};
use crate::limits;
use crate::parser;
use crate::types::job::Job;
use crate::types::jobs_table::JobsTable;
use crate::types::states::JobStatus;

/// Everything needed to admit and track jobs for one connection.
pub struct ShellInfo {
    pub jobs: JobsTable,
}

impl ShellInfo {
    pub fn new() -> Self {
        ShellInfo { jobs: JobsTable::new() }
    }
}

impl Default for ShellInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the servant does after admitting one line: zero or more lines
/// to send back immediately, and — for a freshly launched foreground job —
/// a future the servant must await (while still servicing `CTL` messages)
/// before it may send the next prompt.
pub struct Admission {
    pub lines: Vec<String>,
    pub foreground: Option<(u32, Launched)>,
}

fn yash_err(msg: impl std::fmt::Display) -> String {
    format!("-yash: {msg}")
}

/// `shell.c::ignoreInput`: blank or whitespace-only lines are dropped
/// before ever reaching the parser or the jobs table.
fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// `shell.c:150`'s `JOBS_MSG1`, sent when the table has nothing to list.
const NO_JOBS_MSG: &str = "No jobs in job table\n";

fn format_jobs(jobs: &JobsTable) -> String {
    if jobs.is_empty() {
        return NO_JOBS_MSG.to_string();
    }
    let (current, _previous) = jobs.current_and_previous();
    let mut out = String::new();
    for entry in jobs.iter() {
        let marker = if Some(entry.jobno) == current { '+' } else { '-' };
        let tokens = entry.job.tokens.iter().filter(|t| t.as_str() != "&");
        out.push_str(&format!("[{}]{} {}\t", entry.jobno, marker, entry.job.status.as_str()));
        for tok in tokens {
            out.push_str(tok);
            out.push(' ');
        }
        out.push('\n');
    }
    out
}

/// Polls every live job's process group and reaps whatever has finished,
/// matching `jobsExec`'s call to `maintainJobsTable` before listing jobs.
async fn maintain(shell: &mut ShellInfo) {
    let targets: Vec<(u32, nix::unistd::Pid, usize)> = shell
        .jobs
        .iter()
        .filter(|e| e.job.status != JobStatus::Done)
        .filter_map(|e| e.job.gpid.map(|gpid| (e.jobno, gpid, e.job.child_count)))
        .collect();

    for (jobno, gpid, want) in targets {
        let result = tokio::task::spawn_blocking(move || executor::poll_status(gpid, want)).await;
        if let Ok(Ok(Some(status))) = result {
            if let Some(entry) = shell.jobs.get_mut(jobno) {
                entry.job.status = status;
            }
        }
    }
    shell.jobs.reap_done();
}

/// Admits one client line: a built-in, or a job to parse and launch.
///
/// `socket_fd` wires directly onto a job's stdio streams that aren't
/// explicitly redirected; `events_tx` is where spawned job tasks report
/// status transitions back to the servant's event loop.
pub async fn handle_line(
    shell: &mut ShellInfo,
    raw: &str,
    socket_fd: RawFd,
    events_tx: &mpsc::UnboundedSender<JobEvent>,
) -> Admission {
    if is_blank(raw) {
        return Admission { lines: vec![], foreground: None };
    }

    let trimmed = raw.trim();
    if trimmed == "jobs" {
        maintain(shell).await;
        let report = format_jobs(&shell.jobs);
        return Admission { lines: vec![report.trim_end_matches('\n').to_string()], foreground: None };
    }
    // `bgExec`/`fgExec` in the original are no-ops with no observable output;
    // resumption itself is out of scope, and so is inventing a response.
    if trimmed == "bg" || trimmed.starts_with("bg ") {
        return Admission { lines: vec![], foreground: None };
    }
    if trimmed == "fg" || trimmed.starts_with("fg ") {
        return Admission { lines: vec![], foreground: None };
    }

    if shell.jobs.is_full() {
        return Admission {
            lines: vec![yash_err(format!(
                "max number of concurrent jobs reached: {}",
                limits::MAX_CONCURRENT_JOBS
            ))],
            foreground: None,
        };
    }

    let job = match parser::parse_job(raw) {
        Ok(job) => job,
        Err(e) => return Admission { lines: vec![yash_err(e)], foreground: None },
    };
    let background = job.background;

    let jobno = match admit(shell, job) {
        Ok(n) => n,
        Err(msg) => return Admission { lines: vec![msg], foreground: None },
    };

    let mut lines = Vec::new();
    let (left, right) = {
        let entry = shell.jobs.get(jobno).expect("just inserted");
        (entry.job.left.clone(), entry.job.right.clone())
    };
    let launch_result = tokio::task::spawn_blocking(move || {
        executor::launch(&left, right.as_ref(), socket_fd)
    })
    .await
    .expect("launch task panicked");

    let launched = match launch_result {
        Ok(l) => l,
        Err(e) => {
            lines.push(yash_err(e.message()));
            shell.jobs.remove(jobno);
            return Admission { lines, foreground: None };
        }
    };

    if let Some(right_err) = &launched.right_error {
        lines.push(yash_err(right_err.message()));
    }
    if let Some(entry) = shell.jobs.get_mut(jobno) {
        entry.job.gpid = Some(launched.gpid);
        entry.job.child_count = launched.child_count();
    }

    if background {
        tokio::spawn(job_task::run_background(jobno, launched, events_tx.clone()));
        Admission { lines, foreground: None }
    } else {
        Admission { lines, foreground: Some((jobno, launched)) }
    }
}

/// Admits `job` into the table, returning its job number or the exact
/// refusal message if the table was at capacity.
fn admit(shell: &mut ShellInfo, job: Job) -> Result<u32, String> {
    shell.jobs.insert(job).map_err(|_| {
        yash_err(format!(
            "max number of concurrent jobs reached: {}",
            limits::MAX_CONCURRENT_JOBS
        ))
    })
}

/// Applies the outcome of a foreground job's wait: marks it `Done` and reaps
/// it, or — if it merely stopped (e.g. via `CTL z`) — marks it `Stopped` and
/// hands it off to a background job task so it keeps being reaped without
/// blocking the servant any further. Split out from awaiting the job itself
/// (see [`job_task::run_foreground`]) so a caller can run the wait
/// concurrently with servicing the socket and only apply the result once it
/// resolves — the servant never blocks on a foreground child, the job task
/// does.
pub fn apply_foreground_outcome(
    shell: &mut ShellInfo,
    jobno: u32,
    outcome: ForegroundOutcome,
    events_tx: &mpsc::UnboundedSender<JobEvent>,
) {
    match outcome {
        ForegroundOutcome::Done => {
            if let Some(entry) = shell.jobs.get_mut(jobno) {
                entry.job.status = JobStatus::Done;
            }
            shell.jobs.reap_done();
        }
        ForegroundOutcome::Stopped(launched) => {
            if let Some(entry) = shell.jobs.get_mut(jobno) {
                entry.job.status = JobStatus::Stopped;
            }
            tokio::spawn(job_task::run_background(jobno, launched, events_tx.clone()));
        }
    }
}

/// Waits for a freshly admitted foreground job and applies its outcome.
/// Convenience wrapper over [`apply_foreground_outcome`] for callers (and
/// tests) that don't need to run the wait concurrently with anything else.
pub async fn await_foreground(
    shell: &mut ShellInfo,
    jobno: u32,
    launched: Launched,
    events_tx: &mpsc::UnboundedSender<JobEvent>,
) {
    let outcome = job_task::run_foreground(launched).await;
    apply_foreground_outcome(shell, jobno, outcome, events_tx);
}

/// Applies a status update reported by a background job task.
pub fn apply_event(shell: &mut ShellInfo, ev: JobEvent) {
    if let Some(entry) = shell.jobs.get_mut(ev.jobno) {
        entry.job.status = ev.status;
    }
    if ev.status == JobStatus::Done {
        shell.jobs.reap_done();
    }
}

/// Forwards a `CTL` signal to whichever job is currently in the foreground:
/// the most recently admitted job that is neither `Done` nor backgrounded.
pub fn dispatch_ctl(shell: &ShellInfo, sig: nix::sys::signal::Signal) {
    let target = shell
        .jobs
        .iter()
        .rev()
        .find(|e| e.job.status != JobStatus::Done && !e.job.background)
        .and_then(|e| e.job.gpid);

    if let Some(gpid) = target {
        let _ = executor::signal_group(gpid, sig);
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::io::AsRawFd;

    use super::*;

    fn devnull_fd() -> (std::fs::File, RawFd) {
        let f = std::fs::File::open("/dev/null").expect("open /dev/null");
        let fd = f.as_raw_fd();
        (f, fd)
    }

    #[tokio::test]
    async fn blank_lines_are_ignored() {
        let mut shell = ShellInfo::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_devnull, fd) = devnull_fd();

        let admission = handle_line(&mut shell, "   \t  ", fd, &tx).await;
        assert!(admission.lines.is_empty());
        assert!(admission.foreground.is_none());
        assert!(shell.jobs.is_empty());
    }

    #[tokio::test]
    async fn jobs_with_empty_table_reports_no_jobs() {
        let mut shell = ShellInfo::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_devnull, fd) = devnull_fd();

        let admission = handle_line(&mut shell, "jobs", fd, &tx).await;
        assert_eq!(admission.lines, vec![NO_JOBS_MSG.trim_end_matches('\n').to_string()]);
    }

    #[test]
    fn job_line_uses_tab_and_drops_the_background_marker_token() {
        let mut table = JobsTable::new();
        let mut job = Job::new("sleep 30 &".to_string());
        job.tokens = vec!["sleep".to_string(), "30".to_string(), "&".to_string()];
        job.background = true;
        table.insert(job).unwrap();

        assert_eq!(format_jobs(&table), "[1]+ Running\tsleep 30 \n");
    }

    #[test]
    fn jobs_listing_marks_only_the_most_recent_as_current() {
        let mut table = JobsTable::new();
        table.insert(Job::new("a".to_string())).unwrap();
        table.insert(Job::new("b".to_string())).unwrap();

        let out = format_jobs(&table);
        let mut lines = out.lines();
        assert!(lines.next().unwrap().starts_with("[1]-"));
        assert!(lines.next().unwrap().starts_with("[2]+"));
    }

    #[tokio::test]
    async fn bg_and_fg_are_silent_no_ops() {
        let mut shell = ShellInfo::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_devnull, fd) = devnull_fd();

        let admission = handle_line(&mut shell, "bg", fd, &tx).await;
        assert!(admission.lines.is_empty());
        assert!(shell.jobs.is_empty());

        let admission = handle_line(&mut shell, "fg 1", fd, &tx).await;
        assert!(admission.lines.is_empty());
    }

    #[tokio::test]
    async fn jobs_reaps_a_finished_background_job_before_listing() {
        let mut shell = ShellInfo::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_devnull, fd) = devnull_fd();

        let admission = handle_line(&mut shell, "true &", fd, &tx).await;
        assert!(admission.foreground.is_none());
        assert_eq!(shell.jobs.len(), 1);

        // give the child a moment to actually exit before polling it
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let admission = handle_line(&mut shell, "jobs", fd, &tx).await;
        assert_eq!(admission.lines, vec![NO_JOBS_MSG.trim_end_matches('\n').to_string()]);
        assert!(shell.jobs.is_empty());
    }

    #[tokio::test]
    async fn syntax_errors_never_enter_the_jobs_table() {
        let mut shell = ShellInfo::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_devnull, fd) = devnull_fd();

        let admission = handle_line(&mut shell, "| cat", fd, &tx).await;
        assert_eq!(admission.lines.len(), 1);
        assert!(admission.lines[0].starts_with("-yash: "));
        assert!(shell.jobs.is_empty());
    }

    #[tokio::test]
    async fn capacity_is_enforced_before_parsing() {
        let mut shell = ShellInfo::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_devnull, fd) = devnull_fd();

        for _ in 0..limits::MAX_CONCURRENT_JOBS {
            shell.jobs.insert(Job::new("true &".to_string())).unwrap();
        }

        let admission = handle_line(&mut shell, "true &", fd, &tx).await;
        assert_eq!(
            admission.lines,
            vec![format!(
                "-yash: max number of concurrent jobs reached: {}",
                limits::MAX_CONCURRENT_JOBS
            )]
        );
        assert_eq!(shell.jobs.len(), limits::MAX_CONCURRENT_JOBS);
    }

    #[tokio::test]
    async fn foreground_job_runs_and_is_reaped_on_completion() {
        let mut shell = ShellInfo::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_devnull, fd) = devnull_fd();

        let admission = handle_line(&mut shell, "true", fd, &tx).await;
        assert!(admission.lines.is_empty());
        let (jobno, launched) = admission.foreground.expect("foreground job");
        assert_eq!(shell.jobs.len(), 1);

        await_foreground(&mut shell, jobno, launched, &tx).await;
        assert!(shell.jobs.is_empty(), "a completed foreground job is reaped");
    }

    #[tokio::test]
    async fn background_job_is_tracked_without_blocking_the_caller() {
        let mut shell = ShellInfo::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let (_devnull, fd) = devnull_fd();
        let mut rx = rx;

        let admission = handle_line(&mut shell, "true &", fd, &tx).await;
        assert!(admission.foreground.is_none(), "a backgrounded job doesn't gate the prompt");
        assert_eq!(shell.jobs.len(), 1);

        let ev = rx.recv().await.expect("background task reports completion");
        assert_eq!(ev.status, JobStatus::Done);
        apply_event(&mut shell, ev);
        assert!(shell.jobs.is_empty());
    }
}
