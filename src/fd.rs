use std::io;
use std::os::unix::io::RawFd;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd;

fn errno_to_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFD).map_err(errno_to_io)?;
    let flags = FdFlag::from_bits_truncate(flags) | FdFlag::FD_CLOEXEC;
    fcntl(fd, FcntlArg::F_SETFD(flags)).map_err(errno_to_io)?;
    Ok(())
}

pub(crate) fn unset_cloexec(fd: RawFd) -> io::Result<()> {
    let mut flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).map_err(errno_to_io)?);
    flags.remove(FdFlag::FD_CLOEXEC);
    fcntl(fd, FcntlArg::F_SETFD(flags)).map_err(errno_to_io)?;
    Ok(())
}

/// Duplicate `fd`. The copy preserves descriptor attributes but is created
/// close-on-exec; it only crosses an exec if a pre-exec hook clears the flag.
pub(crate) fn clone_fd(fd: RawFd) -> io::Result<RawFd> {
    fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(fd)).map_err(errno_to_io)
}

pub(crate) fn close_quiet(fd: RawFd) {
    let _ = unistd::close(fd);
}
