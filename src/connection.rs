use std::io::{Read, Write};

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::access_log::{AccessLog, LogRecord};
use crate::config::Config;
use crate::request::{parse_line, read_request, request_line};
use crate::resolve::resolve;
use crate::response::{open_target, write_response, Failure, Outcome, Reply};

/// Decide how to answer a request line: parse it, resolve the target, and open the file.
fn process_request(config: &Config, line: &[u8]) -> Reply {
    let request = match parse_line(line) {
        Ok(request) => request,
        Err(e) => {
            debug!("bad request line {:?}: {}", String::from_utf8_lossy(line), e);
            return Failure::BadRequest.into();
        }
    };
    match resolve(&config.docroot, &request.target) {
        Some(path) => open_target(&path),
        None => {
            debug!("unsafe target {:?}", String::from_utf8_lossy(&request.target));
            Failure::BadRequest.into()
        }
    }
}

/// Handle exactly one connection: read the request, send one response, and append one record
/// to the access log.
///
/// `timestamp` is used for both the Date header and the log record. A 500 caused by a failed read
/// is only logged if `config.log_internal_errors` is set. An error is returned only when the
/// response couldn't be sent or the record couldn't be written; in the first case nothing is
/// logged.
pub fn handle_connection<S: Read + Write>(
    config: &Config,
    stream: &mut S,
    timestamp: &str,
    client: &str,
) -> Result<Outcome> {
    let (line, reply) = match read_request(stream) {
        Ok(request) => {
            let line = request_line(&request);
            let reply = process_request(config, line);
            // Only the log record sees the line as text.
            (String::from_utf8_lossy(line).into_owned(), reply)
        }
        Err(e) => {
            warn!("failed to read request from {}: {}", client, e);
            (String::new(), Failure::InternalError.into())
        }
    };

    let outcome = write_response(stream, reply, timestamp)
        .with_context(|| format!("failed to send response to {}", client))?;

    if outcome == Outcome::InternalError && !config.log_internal_errors {
        return Ok(outcome);
    }
    let access_log = AccessLog::new(&config.log_path);
    access_log
        .append(&LogRecord {
            timestamp,
            client,
            request_line: &line,
            outcome,
        })
        .with_context(|| format!("failed to write to {}", access_log.path().display()))?;
    Ok(outcome)
}
