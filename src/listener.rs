use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use socket2::{Domain, SockRef, Socket, Type};

/// The process's single live server endpoint: one descriptor, stream
/// transport, one bound address. Created once at startup by
/// [`acquire`](crate::acquire), owned by the [`Orchestrator`](crate::Orchestrator)
/// afterwards, closed exactly once.
pub struct ListenerHandle {
    inner: TcpListener,
    addr: SocketAddr,
    name: String,
}

impl ListenerHandle {
    /// Fresh stream socket bound to `addr`.
    pub(crate) fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        Self::from_std(socket.into())
    }

    /// Adopt a descriptor inherited from the previous generation. Ownership
    /// of `fd` transfers to the handle, which closes it on drop.
    ///
    /// # Safety
    ///
    /// `fd` must be open and not owned by anything else in this process.
    pub(crate) unsafe fn adopt(fd: RawFd) -> io::Result<Self> {
        let inner = TcpListener::from_raw_fd(fd);
        let handle = Self::from_std(inner)?;
        if !SockRef::from(&handle.inner).is_listener()? {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "descriptor is a socket but not listening",
            ));
        }
        Ok(handle)
    }

    fn from_std(inner: TcpListener) -> io::Result<Self> {
        let addr = inner.local_addr()?;
        Ok(Self {
            name: addr.to_string(),
            inner,
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Descriptor name carried in the inheritance token: the bound address
    /// rendered as text, so the successor can cross-check what it adopted.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_std(self) -> TcpListener {
        self.inner
    }
}

impl AsRawFd for ListenerHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_reports_bound_address() {
        let handle = ListenerHandle::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert_eq!(handle.name(), handle.local_addr().to_string());
    }

    #[test]
    fn bound_handle_accepts_connections() {
        let handle = ListenerHandle::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = handle.local_addr();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (_conn, peer) = handle.into_std().accept().unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }
}
