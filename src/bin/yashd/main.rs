mod args;

use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tokio_util::sync::CancellationToken;

use args::Args;
use yashd_rs::acceptor;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt().with_max_level(Level::TRACE).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling");
            }
            cancel.cancel();
        });
    }

    let listener = match TcpListener::bind(("0.0.0.0", args.port)).await {
        Ok(l) => l,
        Err(error) => {
            error!(%error, port = args.port, "failed to bind listening socket");
            return ExitCode::from(4);
        }
    };

    info!(port = args.port, "yashd listening");

    match acceptor::run(listener, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "acceptor exited with an error");
            ExitCode::from(1)
        }
    }
}
