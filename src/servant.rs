//! The per-connection servant task: reads `CMD`/`CTL` messages, dispatches
//! them, and sends back the prompt.
//!
//! Grounded on the teacher's `do_client_loop` (`src/bin/ebeans/main.rs`) for
//! the overall `tokio::select!` shape, and on `yashd.h`'s
//! `servant_th_info_t`/`servantThread` for the per-connection state this
//! task owns (one `ShellInfo`, one cancellation flag, reread every
//! [`limits::POLL_INTERVAL`]).

use std::future::Future;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, instrument, warn};

use crate::job_task::{self, ForegroundOutcome};
use crate::limits;
use crate::shell::{self, ShellInfo};
use crate::wire::{self, events::ClientEvent, protocol::Command, ServerMessage};

/// An in-flight foreground job's wait, tagged with its job number so the
/// outcome can be applied once it resolves. Held across loop iterations so
/// the socket read keeps running while the job runs — a `CTL` sent while it
/// is outstanding is still read and dispatched to the job's process group.
type ForegroundWait = Pin<Box<dyn Future<Output = ForegroundOutcome> + Send>>;

/// A live connection's cancellation flag, shared with the acceptor so a
/// server-wide shutdown can ask every servant to stop without waiting for
/// its next socket read to time out.
pub struct ServantEntry {
    pub peer: SocketAddr,
    pub run: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct ServantTable {
    entries: Vec<ServantEntry>,
}

impl ServantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= limits::MAX_CONCURRENT_CLIENTS
    }

    pub fn insert(&mut self, entry: ServantEntry) {
        self.entries.push(entry);
    }

    pub fn remove(&mut self, peer: &SocketAddr) {
        self.entries.retain(|e| &e.peer != peer);
    }

    pub fn stop_all(&self) {
        for e in &self.entries {
            e.run.store(false, Ordering::SeqCst);
        }
    }
}

/// Runs one connection until the client disconnects or `run` is cleared.
#[instrument(name = "servant", skip_all, fields(peer = %peer))]
pub async fn run(conn: TcpStream, peer: SocketAddr, run: Arc<AtomicBool>) -> anyhow::Result<()> {
    let socket_fd: RawFd = conn.as_raw_fd();
    let mut framed = wire::framed(conn);
    let mut shell = ShellInfo::new();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut foreground: Option<(u32, ForegroundWait)> = None;

    framed.send(ServerMessage::Prompt).await.ok();

    loop {
        if !run.load(Ordering::SeqCst) {
            debug!("servant asked to stop");
            return Ok(());
        }

        tokio::select! {
            ev = tokio::time::timeout(limits::POLL_INTERVAL, framed.next()) => {
                let event = match ev {
                    Ok(Some(Ok(ev))) => ev,
                    Ok(Some(Err(e))) => {
                        warn!(error = %e, "decode error, closing connection");
                        return Ok(());
                    }
                    Ok(None) => {
                        debug!("client disconnected");
                        return Ok(());
                    }
                    Err(_timeout) => continue,
                };

                match event {
                    ClientEvent::Malformed => {}
                    ClientEvent::Command(Command::Ctl(sig)) => {
                        let sig = match sig {
                            crate::wire::protocol::CtlSignal::Interrupt => nix::sys::signal::Signal::SIGINT,
                            crate::wire::protocol::CtlSignal::Suspend => nix::sys::signal::Signal::SIGTSTP,
                            crate::wire::protocol::CtlSignal::Eof => {
                                debug!("client sent CTL d, closing connection");
                                return Ok(());
                            }
                        };
                        shell::dispatch_ctl(&shell, sig);
                        framed.send(ServerMessage::Prompt).await.ok();
                    }
                    ClientEvent::Command(Command::Line(line)) => {
                        let admission = shell::handle_line(&mut shell, &line, socket_fd, &events_tx).await;
                        for line in admission.lines {
                            framed.send(ServerMessage::Line(line)).await.ok();
                        }
                        match admission.foreground {
                            Some((jobno, launched)) => {
                                foreground = Some((jobno, Box::pin(job_task::run_foreground(launched))));
                            }
                            None => {
                                framed.send(ServerMessage::Prompt).await.ok();
                            }
                        }
                    }
                }
            }
            ev = events_rx.recv() => {
                if let Some(ev) = ev {
                    shell::apply_event(&mut shell, ev);
                }
            }
            outcome = async {
                match &mut foreground {
                    Some((_, fut)) => fut.await,
                    None => std::future::pending().await,
                }
            }, if foreground.is_some() => {
                let (jobno, _) = foreground.take().expect("guarded by foreground.is_some()");
                shell::apply_foreground_outcome(&mut shell, jobno, outcome, &events_tx);
                framed.send(ServerMessage::Prompt).await.ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    async fn connected_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (server, client, peer)
    }

    #[tokio::test]
    async fn sends_initial_prompt_then_runs_a_command_and_reprompts() {
        let (server, mut client, peer) = connected_pair().await;
        let run_flag = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(run(server, peer, run_flag.clone()));

        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], crate::limits::PROMPT.as_bytes());

        client.write_all(b"CMD true\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], crate::limits::PROMPT.as_bytes(), "true produces no output, just the next prompt");

        client.write_all(b"CTL d\n").await.unwrap();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn malformed_input_is_ignored_not_fatal() {
        let (server, mut client, peer) = connected_pair().await;
        let run_flag = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(run(server, peer, run_flag.clone()));

        let mut buf = [0u8; 256];
        let _ = client.read(&mut buf).await.unwrap(); // initial prompt

        client.write_all(b"not a valid frame at all\n").await.unwrap();
        client.write_all(b"CMD jobs\n").await.unwrap();

        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"No jobs in job table\n\n# ");

        client.write_all(b"CTL d\n").await.unwrap();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn ctl_c_interrupts_a_running_foreground_job_without_blocking_the_read_loop() {
        let (server, mut client, peer) = connected_pair().await;
        let run_flag = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(run(server, peer, run_flag.clone()));

        let mut buf = [0u8; 256];
        let _ = client.read(&mut buf).await.unwrap(); // initial prompt

        client.write_all(b"CMD sleep 30\n").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        client.write_all(b"CTL c\n").await.unwrap();

        // If the servant were still blocked awaiting the foreground job, this
        // read would hang for the sleep's full 30 seconds. A prompt arriving
        // quickly proves the socket kept being read while the job ran.
        let read = tokio::time::timeout(std::time::Duration::from_secs(5), client.read(&mut buf)).await;
        let n = read
            .expect("CTL c should be read and dispatched while the foreground job is still running")
            .unwrap();
        assert!(buf[..n].ends_with(crate::limits::PROMPT.as_bytes()));

        client.write_all(b"CTL d\n").await.unwrap();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn stop_flag_ends_the_loop_without_a_client_message() {
        let (server, client, peer) = connected_pair().await;
        let run_flag = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(run(server, peer, run_flag.clone()));

        run_flag.store(false, Ordering::SeqCst);
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "servant should notice the cleared run flag within one poll interval");
        drop(client);
    }
}
