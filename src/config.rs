use std::convert::TryFrom;
use std::fs::{metadata, OpenOptions};
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Server settings. Built once at startup and shared read-only by every connection.
#[derive(Debug, Clone)]
pub struct Config {
    pub bindaddr: Option<String>,
    pub bindport: u16,
    pub docroot: PathBuf,
    pub log_path: PathBuf,
    pub want_daemon: bool,
    /// Also write access log records for 500 responses.
    pub log_internal_errors: bool,
}

impl Config {
    /// Parse `std::env::args`, printing usage and exiting if asked for help.
    pub fn from_command_line() -> Result<Self> {
        let mut args = std::env::args();
        let name = args.next().unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        let args: Vec<String> = args.collect();
        if args.is_empty() || args.iter().any(|arg| arg == "--help") {
            usage(&name);
            std::process::exit(0);
        }
        if args.len() < 3 {
            usage(&name);
            std::process::exit(1);
        }
        Self::from_args(args)
    }

    /// Parse arguments of the form `portnumber filedirectory logfile [flags]`.
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        let port = args.next().context("missing port number")?;
        let docroot = args.next().context("missing file directory")?;
        let log_path = args.next().context("missing log file")?;
        let mut config = Self {
            bindaddr: None,
            bindport: parse_port(&port)?,
            docroot: PathBuf::from(docroot),
            log_path: PathBuf::from(log_path),
            want_daemon: false,
            log_internal_errors: false,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--addr" => {
                    config.bindaddr = Some(args.next().context("missing ip after --addr")?);
                }
                "--daemon" => config.want_daemon = true,
                "--log-errors" => config.log_internal_errors = true,
                _ => {
                    return Err(anyhow!("unknown argument `{}'", arg));
                }
            }
        }
        Ok(config)
    }

    /// Check that the document root is a directory and that the log file can be appended to.
    pub fn validate(&self) -> Result<()> {
        let docroot = metadata(&self.docroot)
            .with_context(|| format!("directory {} does not exist", self.docroot.display()))?;
        if !docroot.is_dir() {
            return Err(anyhow!("{} is not a directory", self.docroot.display()));
        }
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_path)
            .with_context(|| format!("failed to open log file {}", self.log_path.display()))?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let addr = IpAddr::from_str(self.bindaddr.as_deref().unwrap_or(DEFAULT_BIND_ADDR))?;
        Ok(SocketAddr::new(addr, self.bindport))
    }
}

fn parse_port(number: &str) -> Result<u16> {
    let port: u64 = number
        .parse()
        .with_context(|| format!("{} - not a number", number))?;
    u16::try_from(port).map_err(|_| anyhow!("{} - value out of range", number))
}

fn usage(argv0: &str) {
    print!(
        "usage:\t{} portnumber filedirectory logfile [flags]\n\n\
        flags:\t--addr ip (default: {})\n\
        \t\tIf multiple interfaces are present, specifies\n\
        \t\twhich one to bind the listening port to.\n\n\
        \t--daemon (default: don't daemonize)\n\
        \t\tDetach from the controlling terminal and run in the background.\n\n\
        \t--log-errors (default: off)\n\
        \t\tAlso log requests that failed with 500 Internal Server Error.\n\n",
        argv0, DEFAULT_BIND_ADDR,
    );
}
