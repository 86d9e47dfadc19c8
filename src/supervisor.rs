//! Stops the application's accept loop once the handoff begins.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch::{channel, Receiver, Sender};

/// Broadcasts the stop condition to the guarded accept surface.
pub(crate) struct Supervisor {
    tx: Sender<bool>,
    rx: Receiver<bool>,
}

impl Supervisor {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel(false);
        Self { tx, rx }
    }

    pub(crate) fn stop(&self) {
        log::debug!("stopping the accept surface");
        let _ = self.tx.send(true);
    }

    pub(crate) fn guard(&self, listener: TcpListener) -> GuardedListener {
        GuardedListener {
            inner: listener,
            rx: self.rx.clone(),
            stopped: false,
        }
    }
}

/// The accept surface handed to the application. Yields inbound connections
/// until the orchestrator begins the handoff, then yields `None`; the
/// listening descriptor closes when the guard drops.
pub struct GuardedListener {
    inner: TcpListener,
    rx: Receiver<bool>,
    stopped: bool,
}

impl GuardedListener {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Next inbound connection, or `None` once the handoff has begun.
    pub async fn accept(&mut self) -> Option<io::Result<(TcpStream, SocketAddr)>> {
        loop {
            if self.stopped || *self.rx.borrow() {
                self.stopped = true;
                return None;
            }
            tokio::select! {
                changed = self.rx.changed() => {
                    // A dropped sender means the orchestrator is gone and the
                    // process is on its way out; stop yielding either way.
                    if changed.is_err() {
                        self.stopped = true;
                        return None;
                    }
                }
                res = self.inner.accept() => return Some(res),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_yields_connections_until_stopped() {
        let supervisor = Supervisor::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut guard = supervisor.guard(listener);

        let _client = TcpStream::connect(addr).await.unwrap();
        let conn = guard.accept().await;
        assert!(matches!(conn, Some(Ok(_))));

        supervisor.stop();
        assert!(guard.accept().await.is_none());
        // Stays stopped.
        assert!(guard.accept().await.is_none());
    }

    #[tokio::test]
    async fn stop_before_first_accept() {
        let supervisor = Supervisor::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut guard = supervisor.guard(listener);

        supervisor.stop();
        assert!(guard.accept().await.is_none());
    }

    #[tokio::test]
    async fn dropped_supervisor_stops_the_guard() {
        let supervisor = Supervisor::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut guard = supervisor.guard(listener);

        drop(supervisor);
        assert!(guard.accept().await.is_none());
    }
}
