//! The signal-driven restart state machine.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use futures::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio_stream::wrappers::SignalStream;

use crate::fd;
use crate::handoff;
use crate::listener::ListenerHandle;
use crate::supervisor::{GuardedListener, Supervisor};

/// Handoff lifecycle of one process generation. The only path out of
/// `Running` ends in process termination, so no two handoffs can overlap in
/// the same generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    SignalReceived,
    HandingOff,
    Terminated,
}

/// What the handoff accomplished before this generation terminates. The
/// process exits 0 either way; a report without a successor pid means a
/// service gap.
#[derive(Debug)]
pub struct HandoffReport {
    /// Pid of the spawned successor, if the spawn itself succeeded.
    pub successor: Option<u32>,
    /// Whether the successor inherited a duplicated descriptor. When false
    /// the successor has to bind fresh.
    pub duplicated: bool,
}

/// Owns the process's one [`ListenerHandle`] and coordinates the restart:
/// block on the designated signal, duplicate the listening descriptor, stop
/// accepting, spawn the successor.
pub struct Orchestrator {
    handle: Option<ListenerHandle>,
    // Private duplicate of the listening descriptor, kept so the handoff does
    // not depend on the application still holding its listener. -1 once
    // closed.
    retained_fd: RawFd,
    name: String,
    addr: SocketAddr,
    supervisor: Supervisor,
    trigger: SignalStream,
    state: State,
}

impl Orchestrator {
    /// Take ownership of the listener and subscribe to the restart signal.
    /// Only `kind` is subscribed; delivery of any other signal leaves the
    /// state machine untouched.
    pub fn new(handle: ListenerHandle, kind: SignalKind) -> io::Result<Self> {
        let trigger = SignalStream::new(signal(kind)?);
        let retained_fd = fd::clone_fd(handle.as_raw_fd())?;
        Ok(Self {
            name: handle.name().to_string(),
            addr: handle.local_addr(),
            handle: Some(handle),
            retained_fd,
            supervisor: Supervisor::new(),
            trigger,
            state: State::Running,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Hand the accept surface to the application. The listening descriptor
    /// moves out with it; accepting ends when the handoff begins.
    pub fn listener(&mut self) -> io::Result<GuardedListener> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "listener already taken"))?;
        let listener = handle.into_std();
        listener.set_nonblocking(true)?;
        Ok(self.supervisor.guard(tokio::net::TcpListener::from_std(listener)?))
    }

    /// Block until the restart signal, then hand the socket off: duplicate
    /// the descriptor, stop listening in this generation, spawn the
    /// successor. Returns once this generation has nothing left to do but
    /// exit; duplication and spawn failures are logged, not propagated.
    pub async fn run(mut self) -> HandoffReport {
        log::info!("pid {} running, waiting for restart signal", std::process::id());
        match self.trigger.next().await {
            Some(()) => {}
            None => unreachable!(), // SignalStream is documented to be infinite.
        }
        self.transition(State::SignalReceived);
        log::info!("restart signal received, handing off {}", self.name);

        self.transition(State::HandingOff);
        let token = match handoff::duplicate(self.retained_fd, &self.name) {
            Ok(token) => Some(token),
            Err(e) => {
                log::error!("{e}; successor will bind fresh");
                None
            }
        };

        // Stop accepting in this generation. The duplicate above keeps the
        // underlying socket and its backlog alive until the successor holds
        // its own descriptor.
        self.supervisor.stop();
        self.close_retained();
        drop(self.handle.take());

        let successor = match handoff::spawn_successor(token.as_ref()) {
            Ok(pid) => {
                log::info!("successor pid {pid} spawned");
                Some(pid)
            }
            Err(e) => {
                log::error!("{e}; exiting without a successor");
                None
            }
        };

        self.transition(State::Terminated);
        HandoffReport { successor, duplicated: token.is_some() }
    }

    fn transition(&mut self, next: State) {
        log::debug!("state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn close_retained(&mut self) {
        if self.retained_fd >= 0 {
            fd::close_quiet(self.retained_fd);
            self.retained_fd = -1;
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.close_retained();
    }
}
