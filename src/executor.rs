//! Forks, wires stdio, and executes the one or two commands that make up a
//! job, then waits for the resulting process group.
//!
//! Grounded on `examples/original_source/shell.c`'s `runJob`/
//! `waitForChildren`, realized with `std::process::Command` +
//! [`CommandExt::process_group`] + `CommandExt::pre_exec` rather than a raw
//! `fork()`/`execvp()` pair (see `other_examples/53e06ac6_…executor.rs.rs`
//! for the `pre_exec` idiom this follows). `process_group` gives us the
//! leader/follower `setpgid` dance std already solves race-free; the only
//! `pre_exec` work left is resetting signal dispositions the child should
//! not inherit from the daemon.

use std::io;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};

use crate::redirect::{self, RedirectError};
use crate::types::job::Side;
use crate::types::states::JobStatus;

#[derive(Debug)]
pub enum LaunchError {
    Redirect(RedirectError),
    Exec { errno: i32 },
}

impl LaunchError {
    /// Client-visible text, without the leading `-yash: ` the caller adds.
    pub fn message(&self) -> String {
        match self {
            LaunchError::Redirect(e) => e.to_string(),
            LaunchError::Exec { errno } => format!("execvp() errno: {errno}"),
        }
    }
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

fn exec_err(e: io::Error) -> LaunchError {
    LaunchError::Exec { errno: e.raw_os_error().unwrap_or(-1) }
}

/// Safety: only called between `fork` and `exec` inside `pre_exec`.
unsafe fn reset_child_signals() -> io::Result<()> {
    for sig in [Signal::SIGINT, Signal::SIGTSTP, Signal::SIGCHLD] {
        signal::signal(sig, SigHandler::SigDfl).map_err(nix_to_io)?;
    }
    signal::signal(Signal::SIGTTOU, SigHandler::SigIgn).map_err(nix_to_io)?;
    Ok(())
}

/// Wraps `file`, or (if absent) a fresh duplicate of `fallback_fd`, as a
/// `Stdio` the child will receive on the corresponding descriptor. This is
/// the point at which an explicit redirection overrides the pipe/socket
/// wiring that would otherwise apply, matching the ordering in `spec.md`.
fn stdio_for(file: Option<std::fs::File>, fallback_fd: RawFd) -> io::Result<Stdio> {
    match file {
        Some(f) => Ok(Stdio::from(f)),
        None => {
            let dup_fd = unistd::dup(fallback_fd).map_err(nix_to_io)?;
            // Safety: dup_fd was just returned by dup(2) and is uniquely owned here.
            Ok(unsafe { Stdio::from_raw_fd(dup_fd) })
        }
    }
}

struct FallbackFds {
    stdin: RawFd,
    stdout: RawFd,
    stderr: RawFd,
}

fn spawn_side(side: &Side, pgid: i32, fallback: FallbackFds) -> Result<Child, LaunchError> {
    let files = redirect::open_side(side).map_err(LaunchError::Redirect)?;
    let stdin = stdio_for(files.stdin, fallback.stdin).map_err(exec_err)?;
    let stdout = stdio_for(files.stdout, fallback.stdout).map_err(exec_err)?;
    let stderr = stdio_for(files.stderr, fallback.stderr).map_err(exec_err)?;

    let mut cmd = Command::new(&side.argv[0]);
    cmd.args(&side.argv[1..]);
    cmd.process_group(pgid);
    cmd.stdin(stdin);
    cmd.stdout(stdout);
    cmd.stderr(stderr);
    // Safety: the closure only calls async-signal-safe `signal(2)` wrappers.
    unsafe {
        cmd.pre_exec(|| reset_child_signals());
    }
    cmd.spawn().map_err(exec_err)
}

/// The outcome of successfully starting at least the job's left-hand side.
pub struct Launched {
    pub gpid: Pid,
    children: Vec<Child>,
    /// Set if the right-hand side of a pipeline failed to launch; the left
    /// side still runs and is still tracked.
    pub right_error: Option<LaunchError>,
}

impl Launched {
    /// How many processes are actually running in the group (1, or 2 for a
    /// pipeline whose right-hand side also launched).
    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// Starts a job's process(es) against `socket_fd` (the client connection's
/// raw descriptor, used for whichever streams aren't explicitly
/// redirected). Returns as soon as the left-hand side is running; a pipe
/// follower that fails to exec is reported via `Launched::right_error`
/// rather than aborting the whole job, matching the original's behaviour of
/// always tracking whatever the leading fork produced.
///
/// Takes owned `Side`s (rather than `&Job`) so the call can be moved into
/// `tokio::task::spawn_blocking` wholesale: `Command::spawn` and the
/// `open()`/`pipe()` calls behind it are blocking and must not run inline
/// on an async task.
pub fn launch(left: &Side, right: Option<&Side>, socket_fd: RawFd) -> Result<Launched, LaunchError> {
    match right {
        None => {
            let fallback = FallbackFds { stdin: socket_fd, stdout: socket_fd, stderr: socket_fd };
            let child = spawn_side(left, 0, fallback)?;
            let gpid = Pid::from_raw(child.id() as i32);
            Ok(Launched { gpid, children: vec![child], right_error: None })
        }
        Some(right) => {
            let (read_fd, write_fd) = unistd::pipe().map_err(|e| LaunchError::Exec { errno: e as i32 })?;

            let left_fallback = FallbackFds { stdin: socket_fd, stdout: write_fd, stderr: socket_fd };
            let left = spawn_side(left, 0, left_fallback).map_err(|e| {
                let _ = unistd::close(read_fd);
                let _ = unistd::close(write_fd);
                e
            })?;
            let left_pid = left.id() as i32;

            let right_fallback = FallbackFds { stdin: read_fd, stdout: socket_fd, stderr: socket_fd };
            let right_result = spawn_side(right, left_pid, right_fallback);
            let _ = unistd::close(read_fd);
            let _ = unistd::close(write_fd);

            let (children, right_error) = match right_result {
                Ok(child) => (vec![left, child], None),
                Err(e) => (vec![left], Some(e)),
            };
            Ok(Launched { gpid: Pid::from_raw(left_pid), children, right_error })
        }
    }
}

/// Non-blocking poll of a process group: consumes any exited/stopped/
/// continued children and returns the new status if it changed, `None`
/// otherwise. Grounded on `shell.c`'s `maintainJobsTable`. Takes the group id
/// and expected process count directly (rather than a [`Launched`]) so a
/// connection's jobs table can poll a job's status for itself — e.g. for the
/// `jobs` builtin's pre-listing maintenance pass — without needing the
/// executor's own `Child` handles, which the job task that launched it keeps.
pub fn poll_status(gpid: Pid, want: usize) -> io::Result<Option<JobStatus>> {
    let mut exited = 0usize;
    let mut saw_stop = false;
    let mut saw_continue = false;

    loop {
        match wait::waitpid(
            Pid::from_raw(-gpid.as_raw()),
            Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED),
        ) {
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => {
                exited += 1;
                if exited >= want {
                    return Ok(Some(JobStatus::Done));
                }
            }
            Ok(WaitStatus::Stopped(..)) => saw_stop = true,
            Ok(WaitStatus::Continued(..)) => saw_continue = true,
            Ok(WaitStatus::StillAlive) => break,
            Err(nix::Error::ECHILD) => return Ok(Some(JobStatus::Done)),
            Err(e) => return Err(nix_to_io(e)),
            _ => {}
        }
    }

    if exited > 0 {
        // Some, but not all, of the group's processes have exited; the
        // group as a whole keeps running (matches a pipeline where only
        // one stage has finished so far).
        return Ok(None);
    }
    if saw_stop {
        return Ok(Some(JobStatus::Stopped));
    }
    if saw_continue {
        return Ok(Some(JobStatus::Running));
    }
    Ok(None)
}

/// Non-blocking poll of a launched job's process group, as [`poll_status`]
/// applied to its own group id and child count.
pub fn poll_group(launched: &mut Launched) -> io::Result<Option<JobStatus>> {
    poll_status(launched.gpid, launched.children.len())
}

/// The result of waiting on a foreground job's process group.
#[derive(Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// Every process in the group has exited.
    Done,
    /// At least one process stopped (e.g. via `CTL z`) before the group
    /// finished; the caller should fall back to polling it like a
    /// background job rather than blocking further.
    Stopped,
}

/// Blocks until every process in the job's group has exited, or one stops.
/// Used for foreground jobs; must be called from a blocking context
/// (`tokio::task::spawn_blocking`).
pub fn wait_foreground(launched: &mut Launched) -> io::Result<WaitOutcome> {
    let want = launched.children.len();
    let mut exited = 0usize;
    while exited < want {
        match wait::waitpid(
            Pid::from_raw(-launched.gpid.as_raw()),
            Some(WaitPidFlag::WUNTRACED),
        ) {
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => exited += 1,
            Ok(WaitStatus::Stopped(..)) => return Ok(WaitOutcome::Stopped),
            Err(nix::Error::ECHILD) => return Ok(WaitOutcome::Done),
            Err(e) => return Err(nix_to_io(e)),
            _ => {}
        }
    }
    Ok(WaitOutcome::Done)
}

/// Sends `sig` to every process in the job's group, e.g. in response to a
/// client `CTL c`/`CTL z` message.
pub fn signal_group(gpid: Pid, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-gpid.as_raw()), sig)
}
