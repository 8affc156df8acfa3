//! A minimal client for `yashd`, speaking the unframed `CMD`/`CTL` wire
//! protocol directly. Grounded on `examples/original_source/yash.c` for the
//! overall shape (a reader task forwarding stdin lines, signals translated
//! to `CTL` messages, a receive loop printing whatever arrives), reduced to
//! what's needed for manual end-to-end testing — this binary is not a focus
//! of the system it talks to.

mod args;

use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use args::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let stream = match TcpStream::connect((args.host.as_str(), args.port)).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("yash: could not connect to {}:{}: {e}", args.host, args.port);
            return ExitCode::FAILURE;
        }
    };
    let (mut read_half, mut write_half) = stream.into_split();

    let writer = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        #[cfg(unix)]
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("install SIGINT handler");
        loop {
            #[cfg(unix)]
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if write_half.write_all(format!("CMD {line}\n").as_bytes()).await.is_err() {
                                break;
                            }
                        }
                        _ => {
                            let _ = write_half.write_all(b"CTL d\n").await;
                            break;
                        }
                    }
                }
                _ = sigint.recv() => {
                    if write_half.write_all(b"CTL c\n").await.is_err() {
                        break;
                    }
                }
            }
            #[cfg(not(unix))]
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if write_half.write_all(format!("CMD {line}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
    });

    let mut buf = [0u8; 4096];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                println!("Disconnected!");
                break;
            }
            Ok(n) => {
                use std::io::Write;
                let _ = std::io::stdout().write_all(&buf[..n]);
                let _ = std::io::stdout().flush();
            }
            Err(_) => {
                println!("Disconnected!");
                break;
            }
        }
    }

    writer.abort();
    ExitCode::SUCCESS
}
