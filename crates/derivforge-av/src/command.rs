//! Builder for executing external tool commands with timeout support.
//!
//! Execution is blocking: the caller's thread waits for the child while two
//! reader threads drain stdout and stderr. Once started, a process runs to
//! completion, failure, or the deadline, at which point it is killed.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{Error, Result};

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the child is polled while waiting for the deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Keep only the last N bytes of stderr.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Lines of stderr quoted in failure messages.
const ERROR_PREVIEW_LINES: usize = 3;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Tail of standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use derivforge_av::ToolCommand;
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("quiet")
///     .arg("-print_format").arg("json")
///     .arg("-show_streams")
///     .arg("/path/to/video.mkv")
///     .timeout(Duration::from_secs(30))
///     .execute()?;
/// println!("{}", output.stdout);
/// # Ok::<(), derivforge_av::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and the tail of stderr.
    ///
    /// # Errors
    ///
    /// - [`Error::ToolNotFound`] if the program does not exist.
    /// - [`Error::Timeout`] if the deadline passes; the child is killed.
    /// - [`Error::ToolFailed`] on a non-zero exit (message quotes the last
    ///   stderr lines) or if spawning fails for another reason.
    pub fn execute(&self) -> Result<ToolOutput> {
        let program_name = self.program_name();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::tool_not_found(&program_name),
                _ => Error::tool_failed(&program_name, format!("failed to spawn: {e}")),
            })?;

        let stdout_handle = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_buffer = Arc::new(Mutex::new(Vec::new()));
        let stderr_handle = child
            .stderr
            .take()
            .map(|err| collect_stderr(err, Arc::clone(&stderr_buffer)));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    join_quietly(stdout_handle);
                    if let Some(handle) = stderr_handle {
                        let _ = handle.join();
                    }
                    tracing::warn!(
                        tool = %program_name,
                        timeout = ?self.timeout,
                        "killed external tool at deadline"
                    );
                    return Err(Error::timeout(program_name, self.timeout));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(Error::tool_failed(
                        program_name,
                        format!("I/O error waiting for process: {e}"),
                    ));
                }
            }
        };

        let stdout = stdout_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        if let Some(handle) = stderr_handle {
            let _ = handle.join();
        }
        let stderr = String::from_utf8_lossy(&stderr_buffer.lock()).to_string();

        let output = ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr,
        };

        if !status.success() {
            return Err(Error::tool_failed(
                program_name,
                format!("exited with {}: {}", status, error_preview(&output.stderr)),
            ));
        }

        Ok(output)
    }
}

fn collect_stderr<R: Read + Send + 'static>(
    reader: R,
    buffer: Arc<Mutex<Vec<u8>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::with_capacity(256);
        while reader.read_until(b'\n', &mut line).unwrap_or(0) > 0 {
            let mut guard = buffer.lock();
            guard.extend_from_slice(&line);
            if guard.len() > MAX_STDERR_BYTES {
                let excess = guard.len() - MAX_STDERR_BYTES;
                guard.drain(..excess);
            }
            line.clear();
        }
    })
}

fn join_quietly(handle: Option<thread::JoinHandle<Vec<u8>>>) {
    if let Some(handle) = handle {
        let _ = handle.join();
    }
}

/// Last few non-empty stderr lines joined with " | ".
fn error_preview(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return "no error output".to_string();
    }
    let start = lines.len().saturating_sub(ERROR_PREVIEW_LINES);
    lines[start..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_echo() {
        let output = ToolCommand::new(PathBuf::from("echo")).arg("hello").execute();

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[test]
    fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345")).execute();
        assert!(matches!(result, Err(Error::ToolNotFound { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn execute_times_out() {
        let started = Instant::now();
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("5")
            .timeout(Duration::from_millis(200))
            .execute();
        assert!(matches!(result, Err(ref e) if e.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn execute_nonzero_exit_quotes_stderr() {
        let result = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo one >&2; echo two >&2; exit 3"])
            .execute();
        match result {
            Err(Error::ToolFailed { tool, message }) => {
                assert_eq!(tool, "sh");
                assert!(message.contains("one | two"), "{message}");
            }
            other => panic!("expected ToolFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_error_preview_keeps_tail() {
        assert_eq!(error_preview("a\nb\n\nc\nd\n"), "b | c | d");
        assert_eq!(error_preview(""), "no error output");
    }
}
