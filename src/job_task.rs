//! Per-job background tracking: once a job has been launched, a job task
//! owns reaping it until it reaches [`JobStatus::Done`], reporting status
//! transitions back to the owning servant over a channel.
//!
//! Grounded on `yashd.h`'s `job_th_info_t`/`job_thread_args_t` (one thread
//! per job in the original) and `shell.c`'s `maintainJobsTable` poll loop,
//! realized as a tokio task that sleeps for [`limits::POLL_INTERVAL`]
//! between non-blocking reaps instead of a dedicated OS thread.

use tokio::sync::mpsc;

use crate::executor::{self, Launched, WaitOutcome};
use crate::limits;
use crate::types::states::JobStatus;

/// A status transition, sent from a job task back to its servant so the
/// connection's `JobsTable` can be updated.
#[derive(Debug)]
pub struct JobEvent {
    pub jobno: u32,
    pub status: JobStatus,
}

/// Polls `launched` every [`limits::POLL_INTERVAL`] until it reports a
/// terminal or changed status, sending a [`JobEvent`] on every change. Used
/// for background jobs, and for foreground jobs that stopped rather than
/// exiting (see [`run_foreground`]).
pub async fn run_background(jobno: u32, mut launched: Launched, tx: mpsc::UnboundedSender<JobEvent>) {
    loop {
        tokio::time::sleep(limits::POLL_INTERVAL).await;

        let outcome = tokio::task::spawn_blocking(move || {
            let r = executor::poll_group(&mut launched);
            (launched, r)
        })
        .await;

        let (next_launched, result) = match outcome {
            Ok(pair) => pair,
            Err(_) => {
                let _ = tx.send(JobEvent { jobno, status: JobStatus::Done });
                return;
            }
        };
        launched = next_launched;

        match result {
            Ok(Some(status)) => {
                let done = status == JobStatus::Done;
                let _ = tx.send(JobEvent { jobno, status });
                if done {
                    return;
                }
            }
            Ok(None) => {}
            Err(_) => {
                let _ = tx.send(JobEvent { jobno, status: JobStatus::Done });
                return;
            }
        }
    }
}

/// Waits for a freshly launched foreground job. Returns the job's final
/// outcome: either it ran to completion, or it stopped, in which case the
/// caller should hand `launched` off to [`run_background`] to keep tracking
/// it without blocking the servant any further.
pub enum ForegroundOutcome {
    Done,
    Stopped(Launched),
}

pub async fn run_foreground(mut launched: Launched) -> ForegroundOutcome {
    let joined = tokio::task::spawn_blocking(move || {
        let outcome = executor::wait_foreground(&mut launched);
        (launched, outcome)
    })
    .await;

    match joined {
        Ok((launched, Ok(WaitOutcome::Done))) => {
            drop(launched);
            ForegroundOutcome::Done
        }
        Ok((launched, Ok(WaitOutcome::Stopped))) => ForegroundOutcome::Stopped(launched),
        Ok((_, Err(_))) => ForegroundOutcome::Done,
        Err(_) => ForegroundOutcome::Done,
    }
}
