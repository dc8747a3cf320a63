//! SSH transport over the system `ssh` client.
//!
//! The private key is written to a `0600` temp file that lives as long as the
//! transport. Output is read on two threads (stdout, stderr) and funnelled
//! through a channel so lines reach the caller in arrival order and the
//! timeout can be enforced with `recv_timeout`.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use berth_state::LogStream;

use crate::error::{ExecError, ExecResult};
use crate::transport::{LineSink, SshTarget, Transport, TransportFactory};

/// `ssh` reserves 255 for its own failures.
const SSH_FAILURE_EXIT: i32 = 255;

const AUTH_MARKERS: [&str; 3] = [
    "Permission denied",
    "Authentication failed",
    "Too many authentication failures",
];

pub struct SshTransport {
    target: SshTarget,
    key_file: NamedTempFile,
    connect_timeout_secs: u64,
    program: PathBuf,
}

impl SshTransport {
    pub fn new(target: SshTarget) -> ExecResult<Self> {
        let key_file = write_key_file(&target.key.private_key)?;
        Ok(Self {
            target,
            key_file,
            connect_timeout_secs: 10,
            program: PathBuf::from("ssh"),
        })
    }

    /// Client binary to run instead of `ssh` from `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    /// `ssh` argv for `command` (or an interactive login when `None`).
    pub fn ssh_args(&self, command: Option<&str>) -> Vec<String> {
        build_ssh_args(
            &self.target,
            self.key_file.path(),
            self.connect_timeout_secs,
            command,
        )
    }
}

/// Write a private key to a fresh temp file readable only by us.
fn write_key_file(private_key: &str) -> ExecResult<NamedTempFile> {
    let io_err = |e: std::io::Error| ExecError::connection(format!("cannot stage ssh key: {e}"));
    let mut file = NamedTempFile::new().map_err(io_err)?;
    file.as_file()
        .set_permissions(std::fs::Permissions::from_mode(0o600))
        .map_err(io_err)?;
    file.write_all(private_key.as_bytes()).map_err(io_err)?;
    if !private_key.ends_with('\n') {
        file.write_all(b"\n").map_err(io_err)?;
    }
    file.flush().map_err(io_err)?;
    Ok(file)
}

pub fn build_ssh_args(
    target: &SshTarget,
    key_path: &Path,
    connect_timeout_secs: u64,
    command: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        key_path.display().to_string(),
        "-p".to_string(),
        target.port.to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "LogLevel=ERROR".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={connect_timeout_secs}"),
    ];
    if let Some(command) = command {
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
        args.push(target.destination());
        args.push(command.to_string());
    } else {
        args.push("-t".to_string());
        args.push(target.destination());
    }
    args
}

/// Classify a 255 exit from `ssh` by its diagnostics.
pub fn classify_failure(host: &str, stderr: &[String]) -> ExecError {
    let message = stderr.join("\n");
    if AUTH_MARKERS.iter().any(|marker| message.contains(marker)) {
        ExecError::Authentication {
            host: host.to_string(),
            message,
        }
    } else if message.is_empty() {
        ExecError::connection(format!("ssh to {host} failed"))
    } else {
        ExecError::connection(format!("ssh to {host} failed: {message}"))
    }
}

/// One output line without its terminator. Bytes that are not UTF-8 are
/// replaced rather than ending the stream.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Drain `reader` to EOF so the remote side never sees a closed pipe.
fn pump<R: Read + Send + 'static>(
    reader: R,
    stream: LogStream,
    tx: mpsc::Sender<(LogStream, String)>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut forwarding = true;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
            if !forwarding {
                continue;
            }
            let line = decode_line(&buf);
            forwarding = tx.send((stream, line)).is_ok();
        }
    })
}

impl Transport for SshTransport {
    fn run(&self, command: &str, timeout: Duration, on_line: &mut LineSink<'_>) -> ExecResult<i32> {
        let host = self.target.host.as_str();
        debug!(host, "ssh exec");

        let mut child = Command::new(&self.program)
            .args(self.ssh_args(Some(command)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::connection(format!("cannot spawn ssh: {e}")))?;

        let (tx, rx) = mpsc::channel();
        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump(stdout, LogStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump(stderr, LogStream::Stderr, tx.clone()));
        }
        drop(tx);

        let deadline = Instant::now() + timeout;
        let mut stderr_lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((stream, line)) => {
                    if stream == LogStream::Stderr {
                        stderr_lines.push(line.clone());
                    }
                    on_line(stream, &line);
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(host, ?timeout, "ssh command timed out");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExecError::connection(format!(
                        "command on {host} timed out after {}s",
                        timeout.as_secs()
                    )));
                }
            }
        }
        for handle in pumps {
            let _ = handle.join();
        }

        let status = child
            .wait()
            .map_err(|e| ExecError::connection(format!("ssh wait failed: {e}")))?;
        match status.code() {
            Some(SSH_FAILURE_EXIT) => Err(classify_failure(host, &stderr_lines)),
            Some(code) => Ok(code),
            None => Err(ExecError::connection(format!(
                "ssh to {host} terminated by signal"
            ))),
        }
    }
}

/// Factory producing [`SshTransport`]s.
#[derive(Debug, Clone)]
pub struct SshTransportFactory {
    pub connect_timeout_secs: u64,
}

impl Default for SshTransportFactory {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
        }
    }
}

impl TransportFactory for SshTransportFactory {
    fn connect(&self, target: &SshTarget) -> ExecResult<Arc<dyn Transport>> {
        let transport =
            SshTransport::new(target.clone())?.with_connect_timeout(self.connect_timeout_secs);
        Ok(Arc::new(transport))
    }
}
