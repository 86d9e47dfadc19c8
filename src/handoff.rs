//! Descriptor duplication and successor spawn.

use std::env;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use crate::fd;
use crate::listener::ListenerHandle;

#[derive(Debug, derive_more::Display)]
#[display("{_variant}")]
pub enum HandoffError {
    #[display("cannot duplicate listener descriptor: {}", _0)]
    Duplicate(io::Error),

    #[display("cannot resolve running executable: {}", _0)]
    Executable(io::Error),

    #[display("cannot spawn successor: {}", _0)]
    Spawn(io::Error),
}

/// A second descriptor for the same underlying socket (same accept queue,
/// same bound address), destined for the successor's descriptor table. The
/// parent's copy closes on drop; the successor's copy is its own.
pub struct HandoffToken {
    fd: RawFd,
    name: String,
}

impl HandoffToken {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for HandoffToken {
    fn drop(&mut self) {
        fd::close_quiet(self.fd);
    }
}

/// Duplicate a handle's listening descriptor for inheritance: a second
/// descriptor for the same underlying socket, plus the descriptor name the
/// successor will use to cross-check it.
pub fn duplicate_listener(handle: &ListenerHandle) -> Result<HandoffToken, HandoffError> {
    duplicate(handle.as_raw_fd(), handle.name())
}

/// Duplicate the listening descriptor for inheritance. The duplicate is
/// created close-on-exec; only the successor's pre-exec hook clears the flag,
/// so it cannot leak through any unrelated fork.
pub(crate) fn duplicate(fd: RawFd, name: &str) -> Result<HandoffToken, HandoffError> {
    let dup = fd::clone_fd(fd).map_err(HandoffError::Duplicate)?;
    log::debug!("duplicated listener fd {fd} -> {dup} ({name})");
    Ok(HandoffToken { fd: dup, name: name.to_string() })
}

/// Start the successor generation, fire and forget: the spawn is not awaited
/// and the successor's startup is not confirmed. Stdout and stderr are shared
/// with the successor. Without a token the successor starts with no
/// inheritance flags and binds fresh once this generation is gone.
pub(crate) fn spawn_successor(token: Option<&HandoffToken>) -> Result<u32, HandoffError> {
    let exe = env::current_exe().map_err(HandoffError::Executable)?;
    let mut cmd = Command::new(exe);
    cmd.args(successor_args(env::args().skip(1), token))
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    if let Some(token) = token {
        let inherit_fd = token.fd;
        // Runs after the fork, before the exec: clear close-on-exec so the
        // token descriptor survives into the successor. The flag belongs to
        // the child's descriptor table, so the parent's copy stays cloexec.
        unsafe {
            cmd.pre_exec(move || fd::unset_cloexec(inherit_fd));
        }
    }

    let child = cmd.spawn().map_err(HandoffError::Spawn)?;
    Ok(child.id())
}

/// Rebuild our own argument list for the successor: drop any stale
/// inheritance flags, keep everything else, append the token's.
fn successor_args<I>(mut own: I, token: Option<&HandoffToken>) -> Vec<String>
where
    I: Iterator<Item = String>,
{
    let mut args = Vec::new();
    while let Some(arg) = own.next() {
        match arg.as_str() {
            "-f" | "--fd" | "-n" | "--name" => {
                own.next();
            }
            s if s.starts_with("--fd=") || s.starts_with("--name=") => {}
            _ => args.push(arg),
        }
    }
    if let Some(token) = token {
        args.push("--fd".into());
        args.push(token.fd.to_string());
        args.push("--name".into());
        args.push(token.name.clone());
    }
    args
}
