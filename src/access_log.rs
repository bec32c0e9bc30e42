use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::response::Outcome;

/// Encode string for logging. A record must stay on one line with four tab-separated fields, so
/// control characters (including tab, CR and LF) are percent-encoded.
pub struct LogEncoded<'a>(pub &'a str);

impl<'a> std::fmt::Display for LogEncoded<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            if c.is_control() {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    write!(f, "%{:02X}", b)?;
                }
            } else {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// One line of the access log.
#[derive(Debug)]
pub struct LogRecord<'a> {
    pub timestamp: &'a str,
    pub client: &'a str,
    pub request_line: &'a str,
    pub outcome: Outcome,
}

impl<'a> std::fmt::Display for LogRecord<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{}\t{}\t{}\t{}",
            self.timestamp,
            self.client,
            LogEncoded(self.request_line),
            self.outcome
        )
    }
}

/// Append-only access log file.
///
/// The file is opened and closed for every record, so concurrent connections never share a
/// handle. Each record goes out in a single write to an `O_APPEND` descriptor, which keeps
/// records from different connections from interleaving.
#[derive(Debug, Clone)]
pub struct AccessLog {
    path: PathBuf,
}

impl AccessLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &LogRecord) -> io::Result<()> {
        let message = record.to_string();
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(message.as_bytes())?;
        file.flush()
    }
}
