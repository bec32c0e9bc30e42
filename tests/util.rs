use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::{tempdir, TempDir};

pub const BIN: &str = env!("CARGO_BIN_EXE_loghttpd");

struct ScopedChild(Child);

impl Drop for ScopedChild {
    fn drop(&mut self) {
        self.0.kill().ok();
        self.0.wait().ok();
    }
}

/// Read the server's diagnostics until it reports the address it is listening on.
fn wait_for_listening(stderr: &mut BufReader<ChildStderr>) -> Option<SocketAddr> {
    let mut line = String::new();
    loop {
        line.clear();
        if stderr.read_line(&mut line).ok()? == 0 {
            return None; // exited
        }
        if let Some(pos) = line.find("listening on: http://") {
            let addr = &line[pos + "listening on: http://".len()..];
            return addr.trim_end().trim_end_matches('/').parse().ok();
        }
    }
}

pub struct Server {
    child: ScopedChild,
    // Kept open so the server never writes diagnostics into a closed pipe.
    _stderr: BufReader<ChildStderr>,
    addr: SocketAddr,
    root: TempDir,
    log_dir: TempDir,
}
impl Server {
    pub fn new() -> Self {
        Self::with_args(&[])
    }
    pub fn with_args(args: &[&str]) -> Self {
        let root = tempdir().expect("failed to create tempdir");
        let log_dir = tempdir().expect("failed to create tempdir");
        let log_path = log_dir.path().join("access.log");

        // Port 0 lets the system choose; the real address is read back from the log output.
        let mut child = Command::new(BIN)
            .args(&[
                "0",
                root.path().to_str().expect("path is not valid UTF-8"),
                log_path.to_str().expect("path is not valid UTF-8"),
                "--addr",
                "127.0.0.1",
            ])
            .args(args)
            .env("RUST_LOG", "info")
            .env("RUST_LOG_STYLE", "never")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn loghttpd");
        let mut stderr = BufReader::new(child.stderr.take().expect("stderr not piped"));
        let child = ScopedChild(child);

        let addr = wait_for_listening(&mut stderr).expect("loghttpd failed to start");

        Self {
            child,
            _stderr: stderr,
            addr,
            root,
            log_dir,
        }
    }
    pub fn root(&self) -> &Path {
        self.root.path()
    }
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.path().join("access.log")
    }
    pub fn create_file(&self, name: &str, contents: &[u8]) -> File {
        let path = self.root().join(name);
        let mut file = File::create(path).expect("failed to create file");
        file.write_all(contents).expect("failed to write file");
        file
    }
    pub fn stream(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).expect("failed to connect to loghttpd");
        // Set timeouts to prevent tests from hanging
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
            .set_write_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }
    /// Send raw request bytes and read the response. Returns once the server has closed the
    /// connection, which happens after it has written the access log record.
    pub fn request(&self, request: &[u8]) -> Response {
        let mut stream = self.stream();
        stream.write_all(request).unwrap();
        Response::from_reader(&mut stream).expect("failed to read response")
    }
    pub fn get(&self, path: &str) -> Response {
        self.request(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
    }
    /// Access log records, split into their tab-separated fields.
    pub fn log_records(&self) -> Vec<Vec<String>> {
        let contents = match std::fs::read_to_string(self.log_path()) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => panic!("failed to read access log: {}", e),
        };
        contents
            .lines()
            .map(|line| line.split('\t').map(|field| field.to_string()).collect())
            .collect()
    }
    /// Ask the server to stop and wait for it to exit.
    pub fn terminate(mut self) -> std::process::ExitStatus {
        let pid = Pid::from_raw(self.child.0.id() as i32);
        kill(pid, Signal::SIGTERM).expect("failed to signal loghttpd");
        self.child.0.wait().expect("failed to wait for loghttpd")
    }
}

/// HTTP Response from loghttpd.
pub struct Response {
    response_line: String,
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}
impl Response {
    pub fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let response_line = Self::read_header(reader)?;
        let headers = Self::read_headers(reader)?;
        let length = headers
            .get("Content-Length")
            .map(|length| length.parse::<usize>().expect("invalid content length"))
            .expect("no Content-Length");
        let body = Self::read_body(reader, length)?;
        // Nothing may follow the declared body.
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        assert!(rest.is_empty(), "{} bytes after body", rest.len());
        Ok(Self {
            response_line,
            headers,
            body,
        })
    }
    fn read_headers<R: Read>(reader: &mut R) -> io::Result<HashMap<String, String>> {
        let mut headers = HashMap::new();
        loop {
            let header_line = Self::read_header(reader)?;
            if header_line.is_empty() {
                break;
            }
            let mut header = header_line.splitn(2, ": ");
            let key = header.next().expect("invalid header").to_string();
            let value = header.next().expect("invalid header").to_string();
            headers.insert(key, value);
        }
        Ok(headers)
    }
    fn read_header<R: Read>(reader: &mut R) -> io::Result<String> {
        read_until_slice(reader, b"\r\n")
            .map(|vec| String::from_utf8(vec).expect("response header is not valid UTF-8"))
    }
    fn read_body<R: Read>(reader: &mut R, content_length: usize) -> io::Result<Vec<u8>> {
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body)?;
        Ok(body)
    }
    pub fn response_line(&self) -> &str {
        &self.response_line
    }
    pub fn status(&self) -> &str {
        self.response_line
            .splitn(2, ' ')
            .nth(1)
            .expect("invalid response line")
    }
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|name| name.as_str())
    }
    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).expect("body is not valid UTF-8")
    }
}

fn read_until_slice<R: Read>(reader: &mut R, separator: &[u8]) -> io::Result<Vec<u8>> {
    let mut byte = [0; 1];
    let mut buf = Vec::new();
    loop {
        reader.read_exact(&mut byte)?;
        buf.push(byte[0]);
        if buf.as_slice().ends_with(separator) {
            buf.truncate(buf.len() - separator.len());
            return Ok(buf);
        }
    }
}
