use std::fs::{File, OpenOptions};
use std::os::unix::io::{IntoRawFd, RawFd};

use anyhow::{anyhow, Context, Result};
use log::warn;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, dup2, fork, pipe, read, setsid, ForkResult, Pid};

const PATH_DEVNULL: &str = "/dev/null";

/// Detaching from the terminal happens in two steps so that errors in between are still reported
/// by the parent: `start` forks and leaves the parent waiting on a pipe, `finish` starts a new
/// session, redirects stdio, and releases the parent, which then exits with status 0.
pub struct Daemonize {
    ready_read: RawFd,
    ready_write: RawFd,
    devnull: File,
}

impl Daemonize {
    pub fn start() -> Result<Self> {
        let (ready_read, ready_write) = pipe().context("failed to create pipe")?;
        let devnull = OpenOptions::new()
            .read(true)
            .write(true)
            .open(PATH_DEVNULL)
            .with_context(|| format!("failed to open {}", PATH_DEVNULL))?;

        match unsafe { fork() }.context("failed to fork process")? {
            ForkResult::Parent { child } => wait_for_child(child, ready_read, ready_write),
            ForkResult::Child => Ok(Self {
                ready_read,
                ready_write,
                devnull,
            }),
        }
    }

    pub fn finish(self) -> Result<()> {
        setsid().context("failed to create session")?;
        let devnull = self.devnull.into_raw_fd();
        for &fd in &[libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if let Err(e) = dup2(devnull, fd) {
                warn!("failed to redirect fd {} to {}: {}", fd, PATH_DEVNULL, e);
            }
        }
        // It may have been opened as one of the std fds.
        if devnull > libc::STDERR_FILENO {
            close(devnull).ok();
        }
        close(self.ready_read).ok();
        // Closing the write end is what wakes the parent.
        close(self.ready_write).context("failed to release parent process")?;
        Ok(())
    }
}

/// Block until the child either finishes daemonizing or dies, then exit with its status.
fn wait_for_child(child: Pid, ready_read: RawFd, ready_write: RawFd) -> Result<Daemonize> {
    if let Err(e) = close(ready_write) {
        warn!("failed to close write end of pipe in parent: {}", e);
    }
    let mut buf = [0; 1];
    if let Err(e) = read(ready_read, &mut buf) {
        warn!("failed to read pipe in parent: {}", e);
    }
    match waitpid(child, Some(WaitPidFlag::WNOHANG))
        .with_context(|| format!("failed to wait for process {}", child))?
    {
        WaitStatus::StillAlive => std::process::exit(0),
        WaitStatus::Exited(_, status) => std::process::exit(status),
        status => Err(anyhow!("daemon exited abnormally: {:?}", status)),
    }
}
