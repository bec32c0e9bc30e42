use std::io::{self, Read};

// Only the request line matters, so stop reading once this many bytes have arrived.
pub const MAX_REQUEST_LENGTH: usize = 4096;

const METHOD_GET: &str = "GET";
const PROTOCOL_HTTP_1_1: &str = "HTTP/1.1";

/// Receive a request from the client.
///
/// Reads until a newline has been seen, the buffer is full, or the client closes its end. A read
/// interrupted by a signal is retried, any other read error is returned.
pub fn read_request<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut buf = [0; MAX_REQUEST_LENGTH];
    let mut recvd_total = 0;
    while recvd_total < buf.len() {
        let recvd = match reader.read(&mut buf[recvd_total..]) {
            Ok(0) => break, // closure
            Ok(recvd) => recvd,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let has_newline = buf[recvd_total..recvd_total + recvd].contains(&b'\n');
        recvd_total += recvd;
        if has_newline {
            break;
        }
    }
    Ok(buf[..recvd_total].to_vec())
}

/// Return the first line of a request, without its line terminator.
///
/// The line is left as raw bytes: the target names a file, and file names need not be UTF-8.
pub fn request_line(request: &[u8]) -> &[u8] {
    let end = request
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or_else(|| request.len());
    let line = &request[..end];
    line.strip_suffix(&b"\r"[..]).unwrap_or(line)
}

/// A parsed request line like "GET / HTTP/1.1".
#[derive(Debug, PartialEq)]
pub struct RequestLine {
    pub method: String,
    pub target: Vec<u8>,
    pub version: String,
}

/// Why a request line was rejected.
#[derive(Debug, PartialEq)]
pub enum ParseError {
    TokenCount(usize),
    Method(String),
    Version(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenCount(count) => write!(f, "expected 3 tokens, found {}", count),
            Self::Method(method) => write!(f, "unsupported method `{}'", method),
            Self::Version(version) => write!(f, "unsupported protocol `{}'", version),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a request line. Only `GET` over `HTTP/1.1` is accepted, both matched case-sensitively.
/// Tokens are separated by runs of ASCII whitespace.
pub fn parse_line(line: &[u8]) -> Result<RequestLine, ParseError> {
    let tokens: Vec<&[u8]> = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|token| !token.is_empty())
        .collect();
    let (method, target, version) = match tokens.as_slice() {
        [method, target, version] => (*method, *target, *version),
        _ => return Err(ParseError::TokenCount(tokens.len())),
    };
    if method != METHOD_GET.as_bytes() {
        return Err(ParseError::Method(String::from_utf8_lossy(method).into_owned()));
    }
    if version != PROTOCOL_HTTP_1_1.as_bytes() {
        return Err(ParseError::Version(
            String::from_utf8_lossy(version).into_owned(),
        ));
    }
    Ok(RequestLine {
        method: METHOD_GET.to_string(),
        target: target.to_vec(),
        version: PROTOCOL_HTTP_1_1.to_string(),
    })
}
