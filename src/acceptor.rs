//! The process-wide accept loop: binds the listening socket, admits up to
//! [`limits::MAX_CONCURRENT_CLIENTS`] connections, and spawns a servant task
//! per connection.
//!
//! Grounded on the teacher's `accept_loop` (`src/bin/ebeans/main.rs`) for the
//! `tokio::select!` shape, and on `yashd.c`'s `createSocket`/`main` for the
//! listen backlog and per-connection admission check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::limits;
use crate::servant::{self, ServantEntry, ServantTable};
use crate::wire::{self, encoder::ServerMessage};

/// Accepts connections on `listener` until `cancel` fires. Mirrors the
/// original's one-thread-per-client model with one tokio task per client,
/// and its `MAX_CONCURRENT_CLIENTS` cap via `ServantTable`.
pub async fn run(listener: TcpListener, cancel: CancellationToken) -> anyhow::Result<()> {
    let table = Arc::new(Mutex::new(ServantTable::new()));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (conn, peer) = accepted?;
                let mut guard = table.lock().expect("servant table poisoned");
                if guard.is_full() {
                    warn!(%peer, limit = limits::MAX_CONCURRENT_CLIENTS, "refusing connection: at capacity");
                    drop(guard);
                    reject(conn).await;
                    continue;
                }

                let run_flag = Arc::new(AtomicBool::new(true));
                guard.insert(ServantEntry { peer, run: run_flag.clone() });
                drop(guard);

                info!(%peer, "accepted connection");
                let table = table.clone();
                tokio::spawn(async move {
                    if let Err(e) = servant::run(conn, peer, run_flag).await {
                        warn!(%peer, error = %e, "servant task ended with an error");
                    }
                    table.lock().expect("servant table poisoned").remove(&peer);
                });
            }
            _ = cancel.cancelled() => {
                info!("shutting down acceptor");
                table.lock().expect("servant table poisoned").stop_all();
                return Ok(());
            }
        }
    }
}

/// A connection arriving once the client table is full is told so and
/// closed immediately, rather than left to hang.
async fn reject(conn: tokio::net::TcpStream) {
    use tokio::io::AsyncWriteExt;
    let mut framed = wire::framed(conn);
    let _ = futures::SinkExt::send(
        &mut framed,
        ServerMessage::Line("-yash: server is at capacity, try again later".to_string()),
    )
    .await;
    let _ = framed.into_inner().shutdown().await;
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    use super::*;

    #[tokio::test]
    async fn shutdown_on_cancellation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(run(listener, cancel_clone));

        cancel.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "acceptor must return once cancelled");
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn accepts_and_serves_a_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let _handle = tokio::spawn(run(listener, cancel.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], limits::PROMPT.as_bytes());

        cancel.cancel();
    }
}
