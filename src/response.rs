use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use log::warn;

pub const CONTENT_TYPE: &str = "text/html";

// Size of each read from a file being sent.
const SEND_CHUNK_SIZE: usize = 4096;

/// A request that can't be served, and the fixed page sent back for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    BadRequest,
    Forbidden,
    NotFound,
    InternalError,
}

impl Failure {
    pub fn code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::InternalError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::InternalError => "Internal Server Error",
        }
    }

    pub fn page(self) -> &'static str {
        match self {
            Self::BadRequest => {
                "<html><body>\n\
                <h2>Malformed Request</h2>\n\
                Your browser sent a request I could not understand.\n\
                </body></html>\n"
            }
            Self::Forbidden => {
                "<html><body>\n\
                <h2>Permission Denied</h2>\n\
                You asked for a document you are not permitted to see. It sucks to be you.\n\
                </body></html>\n"
            }
            Self::NotFound => {
                "<html><body>\n\
                <h2>Document not found</h2>\n\
                You asked for a document that doesn't exist. That is so sad.\n\
                </body></html>\n"
            }
            Self::InternalError => {
                "<html><body>\n\
                <h2>That Didn't work</h2>\n\
                I had some sort of problem dealing with your request. Sorry, I'm lame.\n\
                </body></html>\n"
            }
        }
    }
}

/// The decided result of one request. Drives both the response and the access log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok { written: u64, total: u64 },
    BadRequest,
    Forbidden,
    NotFound,
    InternalError,
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::BadRequest => Self::BadRequest,
            Failure::Forbidden => Self::Forbidden,
            Failure::NotFound => Self::NotFound,
            Failure::InternalError => Self::InternalError,
        }
    }
}

/// Status phrase as written to the access log, e.g. "200 OK 12/12" or "404 Not Found".
impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let failure = match *self {
            Self::Ok { written, total } => return write!(f, "200 OK {}/{}", written, total),
            Self::BadRequest => Failure::BadRequest,
            Self::Forbidden => Failure::Forbidden,
            Self::NotFound => Failure::NotFound,
            Self::InternalError => Failure::InternalError,
        };
        write!(f, "{} {}", failure.code(), failure.reason())
    }
}

/// What to send back, decided before anything is written.
#[derive(Debug)]
pub enum Reply {
    File { file: File, size: u64 },
    Error(Failure),
}

impl From<Failure> for Reply {
    fn from(failure: Failure) -> Self {
        Self::Error(failure)
    }
}

/// Map a failed open to the reply the client gets.
fn open_failure(e: &io::Error) -> Failure {
    match e.kind() {
        io::ErrorKind::NotFound => Failure::NotFound,
        io::ErrorKind::PermissionDenied => Failure::Forbidden,
        // A file used as a directory, e.g. "/index.html/foo".
        _ if e.raw_os_error() == Some(libc::ENOTDIR) => Failure::NotFound,
        _ => Failure::InternalError,
    }
}

/// Open the file a request resolved to.
///
/// The open is non-blocking so that a FIFO without a writer is turned away as forbidden instead
/// of stalling the worker. Reads from a regular file are unaffected by `O_NONBLOCK`.
pub fn open_target(path: &Path) -> Reply {
    let opened = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path);
    let file = match opened {
        Ok(file) => file,
        Err(e) => {
            let failure = open_failure(&e);
            if failure == Failure::InternalError {
                warn!("failed to open {}: {}", path.display(), e);
            }
            return failure.into();
        }
    };

    let metadata = match file.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("fstat() failed for {}: {}", path.display(), e);
            return Failure::InternalError.into();
        }
    };

    // No directory listings.
    if !metadata.is_file() {
        return Failure::Forbidden.into();
    }

    Reply::File {
        file,
        size: metadata.len(),
    }
}

fn write_header<W: Write>(
    out: &mut W,
    code: u16,
    reason: &str,
    date: &str,
    content_length: u64,
) -> io::Result<()> {
    let header = format!(
        "HTTP/1.1 {} {}\r\n\
        Date: {}\r\n\
        Content-Type: {}\r\n\
        Content-Length: {}\r\n\
        \r\n",
        code, reason, date, CONTENT_TYPE, content_length,
    );
    out.write_all(header.as_bytes())
}

/// Copy up to `size` bytes of `file` to `out`, returning how many were sent.
///
/// A file read error ends the body early; a write error is returned.
fn send_file<R: Read, W: Write>(out: &mut W, file: R, size: u64) -> io::Result<u64> {
    let mut file = file.take(size);
    let mut buf = [0; SEND_CHUNK_SIZE];
    let mut sent = 0;
    loop {
        let len = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("failed to read file after {} bytes: {}", sent, e);
                break;
            }
        };
        out.write_all(&buf[..len])?;
        sent += len as u64;
    }
    Ok(sent)
}

/// Send a complete response: status line, headers, blank line and body.
///
/// `Write::write_all` takes care of short and interrupted writes. Any other write error is fatal
/// to the connection and is returned.
pub fn write_response<W: Write>(out: &mut W, reply: Reply, date: &str) -> io::Result<Outcome> {
    let outcome = match reply {
        Reply::File { file, size } => {
            write_header(out, 200, "OK", date, size)?;
            let written = send_file(out, file, size)?;
            Outcome::Ok {
                written,
                total: size,
            }
        }
        Reply::Error(failure) => {
            let page = failure.page();
            write_header(
                out,
                failure.code(),
                failure.reason(),
                date,
                page.len() as u64,
            )?;
            out.write_all(page.as_bytes())?;
            failure.into()
        }
    };
    out.flush()?;
    Ok(outcome)
}
