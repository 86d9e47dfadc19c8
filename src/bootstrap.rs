//! Listener acquisition: adopt an inherited descriptor or bind fresh.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use crate::fd;
use crate::listener::ListenerHandle;

/// Inheritance token: the descriptor number and descriptor name the previous
/// generation put on our command line. Exists only at the process-creation
/// boundary and is consumed at most once, by [`acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inheritance {
    pub fd: RawFd,
    pub name: String,
}

impl Inheritance {
    /// Both flags must be present together, the descriptor positive and the
    /// name non-empty. Anything else means no inheritance.
    pub fn from_flags(fd: Option<i32>, name: Option<String>) -> Option<Self> {
        match (fd, name) {
            (Some(fd), Some(name)) if fd > 0 && !name.is_empty() => Some(Self { fd, name }),
            _ => None,
        }
    }
}

/// Produce the process's one listening socket.
///
/// With an inheritance token, adopt the descriptor and keep serving the
/// socket bound by the previous generation. A token that cannot be adopted
/// (stale descriptor, not a listening socket, address mismatch) is logged and
/// abandoned in favor of a fresh bind on `fallback`. Without a token, bind
/// fresh.
///
/// After this call exactly one listening socket exists in the process, or the
/// call fails and the process cannot provide service at all.
pub fn acquire(
    inheritance: Option<Inheritance>,
    fallback: SocketAddr,
) -> io::Result<ListenerHandle> {
    if let Some(token) = inheritance {
        match adopt(&token) {
            Ok(handle) => {
                log::info!("adopted inherited listener fd {} ({})", token.fd, handle.name());
                return Ok(handle);
            }
            Err(e) => {
                log::warn!(
                    "cannot adopt inherited fd {} ({}): {e}; binding fresh",
                    token.fd,
                    token.name
                );
            }
        }
    }
    let handle = ListenerHandle::bind(fallback)?;
    log::info!("listening on {}", handle.local_addr());
    Ok(handle)
}

fn adopt(token: &Inheritance) -> io::Result<ListenerHandle> {
    // The parent cleared close-on-exec so the descriptor would survive its
    // exec; restore the flag before this process forks anything.
    fd::set_cloexec(token.fd)?;
    let handle = unsafe { ListenerHandle::adopt(token.fd) }?;
    if handle.name() != token.name {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("descriptor is bound to {}, token names {}", handle.name(), token.name),
        ));
    }
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::os::unix::io::{AsRawFd, IntoRawFd};

    #[test]
    fn missing_or_invalid_flags_mean_no_inheritance() {
        assert!(Inheritance::from_flags(None, None).is_none());
        assert!(Inheritance::from_flags(Some(4), None).is_none());
        assert!(Inheritance::from_flags(None, Some("127.0.0.1:1".into())).is_none());
        assert!(Inheritance::from_flags(Some(0), Some("127.0.0.1:1".into())).is_none());
        assert!(Inheritance::from_flags(Some(-1), Some("127.0.0.1:1".into())).is_none());
        assert!(Inheritance::from_flags(Some(4), Some(String::new())).is_none());

        let token = Inheritance::from_flags(Some(4), Some("127.0.0.1:1".into())).unwrap();
        assert_eq!(token.fd, 4);
        assert_eq!(token.name, "127.0.0.1:1");
    }

    #[test]
    fn fresh_bind_without_inheritance() {
        let handle = acquire(None, "127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(TcpStream::connect(handle.local_addr()).is_ok());
    }

    #[test]
    fn inherited_descriptor_round_trip() {
        let first = ListenerHandle::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr();
        let dup = fd::clone_fd(first.as_raw_fd()).unwrap();

        // The fallback address equals the live listener's address, so a
        // fallback bind would fail with "address in use". Success proves the
        // descriptor was adopted, not rebound.
        let token = Inheritance { fd: dup, name: addr.to_string() };
        let adopted = acquire(Some(token), addr).unwrap();
        assert_eq!(adopted.local_addr(), addr);

        let client = TcpStream::connect(addr).unwrap();
        let (_conn, peer) = adopted.into_std().accept().unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[test]
    fn stale_descriptor_falls_back_to_fresh_bind() {
        let file = std::fs::File::open("/dev/null").unwrap();
        let token = Inheritance { fd: file.into_raw_fd(), name: "127.0.0.1:1".into() };
        let handle = acquire(Some(token), "127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(TcpStream::connect(handle.local_addr()).is_ok());
    }

    #[test]
    fn name_mismatch_falls_back_to_fresh_bind() {
        let first = ListenerHandle::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let dup = fd::clone_fd(first.as_raw_fd()).unwrap();

        let token = Inheritance { fd: dup, name: "10.0.0.1:9999".into() };
        let handle = acquire(Some(token), "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(handle.local_addr(), first.local_addr());
    }
}
