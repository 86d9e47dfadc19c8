//! moltd - demonstration daemon. Serves a one-line banner on a TCP socket
//! and hands the socket to a fresh copy of itself on SIGHUP.

use std::net::SocketAddr;
use std::process::exit;

use clap::Parser;
use tokio::io::AsyncWriteExt;

use molt::{acquire, Inheritance, Orchestrator, SignalKind};

#[derive(Parser)]
#[command(name = "moltd", about = "Zero-downtime restart demonstration server")]
struct Args {
    /// Descriptor number passed by the parent generation.
    #[arg(short = 'f', long, allow_negative_numbers = true)]
    fd: Option<i32>,

    /// Descriptor name passed by the parent generation.
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Address to bind when no descriptor is inherited.
    #[arg(long, default_value = "127.0.0.1:22222")]
    listen: SocketAddr,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let pid = std::process::id();

    let handle = match acquire(Inheritance::from_flags(args.fd, args.name), args.listen) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("pid {pid}: no listener: {e}");
            exit(1);
        }
    };

    let mut orchestrator = match Orchestrator::new(handle, SignalKind::hangup()) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            log::error!("pid {pid}: cannot subscribe to the restart signal: {e}");
            exit(1);
        }
    };

    let mut conns = match orchestrator.listener() {
        Ok(conns) => conns,
        Err(e) => {
            log::error!("pid {pid}: cannot start accepting: {e}");
            exit(1);
        }
    };

    log::info!("pid {pid} serving on {}", orchestrator.local_addr());

    tokio::spawn(async move {
        while let Some(conn) = conns.accept().await {
            match conn {
                Ok((mut stream, peer)) => {
                    log::info!("pid {pid} accepted {peer}");
                    tokio::spawn(async move {
                        let banner = format!("moltd pid {pid}\n");
                        let _ = stream.write_all(banner.as_bytes()).await;
                    });
                }
                Err(e) => log::warn!("pid {pid}: accept failed: {e}"),
            }
        }
        log::info!("pid {pid} stopped accepting");
    });

    let report = orchestrator.run().await;
    match report.successor {
        Some(successor) => log::info!("pid {pid} handed off to pid {successor}, exiting"),
        None => log::error!("pid {pid} exiting without a successor"),
    }
    exit(0);
}
