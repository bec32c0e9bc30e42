use std::io;
use std::net::{IpAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::signal::{signal, SigHandler, Signal};

use crate::config::Config;
use crate::connection::handle_connection;
use crate::date::HttpDate;

// How long the accept loop waits before checking whether it should stop.
const POLL_TIMEOUT_MS: libc::c_int = 1000;

// Pause after a failed accept(). The listener stays readable while the error lasts (EMFILE, say).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn stop_running(_signal: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

fn is_running() -> bool {
    RUNNING.load(Ordering::Relaxed)
}

/// Ignore SIGPIPE so a vanished client surfaces as a write error, and stop the accept loop on
/// SIGINT or SIGTERM.
pub fn set_signal_handlers() -> Result<()> {
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .context("failed to set SIGPIPE handler")?;
    unsafe { signal(Signal::SIGINT, SigHandler::Handler(stop_running)) }
        .context("failed to set SIGINT handler")?;
    unsafe { signal(Signal::SIGTERM, SigHandler::Handler(stop_running)) }
        .context("failed to set SIGTERM handler")?;
    Ok(())
}

/// Initialize the TcpListener. This is the socket that we accept connections from.
pub fn create_listener(config: &Config) -> Result<TcpListener> {
    let socket_addr = config.socket_addr().context("malformed --addr argument")?;
    // Sets `SO_REUSEADDR` implicitly.
    let listener = TcpListener::bind(socket_addr)
        .with_context(|| format!("failed to create listening socket for {}", socket_addr))?;
    info!("listening on: http://{}/", listener.local_addr()?);
    Ok(listener)
}

struct Worker {
    client: IpAddr,
    handle: JoinHandle<()>,
}

impl Worker {
    fn join(self) {
        if self.handle.join().is_err() {
            error!("worker for {} panicked", self.client);
        }
    }
}

/// Runs one worker thread per connection and joins them once they finish.
pub struct Supervisor {
    config: Arc<Config>,
    workers: Vec<Worker>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            workers: Vec::new(),
        }
    }

    /// Number of connections still being handled.
    pub fn active(&self) -> usize {
        self.workers.len()
    }

    /// Hand a freshly accepted connection to a new worker thread.
    pub fn dispatch(&mut self, stream: TcpStream, client: IpAddr, now: SystemTime) -> Result<()> {
        let config = Arc::clone(&self.config);
        let timestamp = HttpDate(now).to_string();
        let handle = thread::Builder::new()
            .name(format!("conn-{}", client))
            .spawn(move || {
                let mut stream = stream;
                let client = client.to_string();
                match handle_connection(&config, &mut stream, &timestamp, &client) {
                    Ok(outcome) => debug!("{}: {}", client, outcome),
                    Err(e) => warn!("{}: {:#}", client, e),
                }
            })
            .context("failed to spawn worker thread")?;
        self.workers.push(Worker { client, handle });
        Ok(())
    }

    /// Join workers that have finished, keeping the rest.
    pub fn reap(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .workers
            .drain(..)
            .partition(|worker| worker.handle.is_finished());
        self.workers = running;
        for worker in finished {
            worker.join();
        }
    }

    /// Wait for every outstanding worker.
    pub fn shutdown(mut self) {
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

/// Accept a connection and dispatch it. Only a failed accept() is returned.
fn accept_connection(listener: &TcpListener, supervisor: &mut Supervisor) -> io::Result<()> {
    let (stream, addr) = listener.accept()?;
    debug!("accepted connection from {}", addr);
    if let Err(e) = supervisor.dispatch(stream, addr.ip(), SystemTime::now()) {
        error!("dropping connection from {}: {:#}", addr, e);
    }
    Ok(())
}

/// Main loop: accept connections until SIGINT/SIGTERM, reaping finished workers as it goes.
pub fn serve(listener: &TcpListener, supervisor: &mut Supervisor) -> Result<()> {
    while is_running() {
        let mut fds = [PollFd::new(listener.as_raw_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, POLL_TIMEOUT_MS) {
            Ok(0) => {} // timed out
            Ok(_) => {
                if let Err(e) = accept_connection(listener, supervisor) {
                    warn!("accept() failed: {}", e);
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
            Err(e) if e.as_errno() == Some(Errno::EINTR) => {} // interrupted by signal
            Err(e) => return Err(e).context("poll() failed"),
        }
        supervisor.reap();
    }
    Ok(())
}
