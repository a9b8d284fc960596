//! Runs a staged script as a child process with a wall-clock deadline.

use crate::error::RunError;
use crate::staging::StagedScript;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8192;

/// Outcome of one child process run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    /// Set when either stream went past the capture cap.
    pub truncated: bool,
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// Map the exit status onto success (stdout) or a run error. A timeout wins
    /// over whatever exit code the killed child reported.
    pub fn into_stdout(self) -> Result<Vec<u8>, RunError> {
        if self.timed_out {
            return Err(RunError::ExecutionTimeout(self.elapsed.as_millis() as u64));
        }
        match (self.exit_code, self.signal) {
            (Some(0), _) => Ok(self.stdout),
            (Some(code), _) => Err(RunError::ExecutionFailed(failure_detail(
                &self.stderr,
                format!("script exited with status {}", code),
            ))),
            (None, Some(sig)) => Err(RunError::ExecutionFailed(failure_detail(
                &self.stderr,
                format!("script terminated by signal {}", sig),
            ))),
            (None, None) => Err(RunError::ExecutionFailed(failure_detail(
                &self.stderr,
                "script exited without a status".to_string(),
            ))),
        }
    }
}

fn failure_detail(stderr: &[u8], fallback: String) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        fallback
    } else {
        text.to_string()
    }
}

/// Spawns `<interpreter> <staged path>` and feeds it JSON on stdin.
#[derive(Debug, Clone)]
pub struct Executor {
    interpreter: String,
    timeout: Duration,
    max_output_bytes: usize,
}

impl Executor {
    pub fn new(interpreter: impl Into<String>, timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            max_output_bytes,
        }
    }

    /// Run the script once. Returns `Err` only when the child could not be
    /// started or its output could not be collected; exit status and timeouts
    /// are reported in the result.
    pub async fn execute(
        &self,
        script: &StagedScript,
        input: &serde_json::Value,
    ) -> Result<ExecutionResult, RunError> {
        let payload = serde_json::to_vec(input)
            .map_err(|e| RunError::InvalidRequest(format!("input_data: {}", e)))?;

        let mut command = Command::new(&self.interpreter);
        command
            .arg(script.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so the whole tree can be killed on timeout.
        command.process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            warn!(interpreter = %self.interpreter, error = %e, "Failed to spawn interpreter");
            RunError::ExecutionFailed(format!(
                "could not start interpreter `{}`: {}",
                self.interpreter, e
            ))
        })?;
        let pid = child.id();
        info!(id = script.id(), pid = ?pid, interpreter = %self.interpreter, "Script spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.max_output_bytes;

        let finished = tokio::time::timeout(self.timeout, async {
            let (written, status, out, err) = tokio::join!(
                write_input(stdin, payload),
                child.wait(),
                read_capped(stdout, cap),
                read_capped(stderr, cap),
            );
            if let Err(e) = written {
                warn!(error = %e, "Failed to write script input");
            }
            Ok::<_, io::Error>((status?, out?, err?))
        })
        .await;

        let elapsed = started.elapsed();
        let result = match finished {
            Ok(Ok((status, out, err))) => {
                let (exit_code, signal) = exit_parts(status);
                ExecutionResult {
                    exit_code,
                    signal,
                    truncated: out.truncated || err.truncated,
                    stdout: out.bytes,
                    stderr: err.bytes,
                    timed_out: false,
                    elapsed,
                }
            }
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                warn!(id = script.id(), error = %e, "Failed to collect script output");
                return Err(RunError::ExecutionFailed(format!(
                    "failed to collect script output: {}",
                    e
                )));
            }
            Err(_) => {
                warn!(
                    id = script.id(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Script exceeded deadline, killing"
                );
                terminate(&mut child, pid).await;
                ExecutionResult {
                    timed_out: true,
                    elapsed: started.elapsed(),
                    ..ExecutionResult::default()
                }
            }
        };

        if result.truncated {
            warn!(id = script.id(), cap, "Script output truncated");
        }
        info!(
            id = script.id(),
            exit_code = ?result.exit_code,
            signal = ?result.signal,
            timed_out = result.timed_out,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Script finished"
        );
        Ok(result)
    }
}

/// Kill the child's process group (best-effort for descendants), then the
/// child itself, and reap it.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "killpg failed");
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill failed");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap killed script");
    }
}

async fn write_input(stdin: Option<ChildStdin>, payload: Vec<u8>) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(&payload).await {
        // The script is free to exit without reading its input.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!("Script closed stdin before reading all input");
            Ok(())
        }
        Err(e) => Err(e),
        Ok(()) => {
            drop(stdin);
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Read a stream to EOF, keeping at most `cap` bytes and draining the rest.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let Some(mut reader) = reader else {
        return Ok(captured);
    };
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(captured.bytes.len());
        if n > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok(captured)
}

fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), status.signal())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::StagingStore;
    use serde_json::json;
    use tempfile::TempDir;

    async fn stage(script: &str) -> (TempDir, StagingStore, StagedScript) {
        let tmp = tempfile::tempdir().unwrap();
        let store = StagingStore::new(tmp.path()).unwrap();
        let staged = store.stage(script.as_bytes(), Some("sh")).await.unwrap();
        (tmp, store, staged)
    }

    fn sh(timeout: Duration) -> Executor {
        Executor::new("sh", timeout, 64 * 1024)
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let (_tmp, _store, staged) = stage("printf 42\n").await;
        let result = sh(Duration::from_secs(5)).execute(&staged, &json!({})).await.unwrap();

        assert_eq!(result.exit_code, Some(0));
        assert!(!result.timed_out);
        assert_eq!(result.into_stdout().unwrap(), b"42");
    }

    #[tokio::test]
    async fn input_arrives_as_compact_json_on_stdin() {
        let (_tmp, _store, staged) = stage("cat\n").await;
        let input = json!({"name": "ada", "n": [1, 2]});
        let result = sh(Duration::from_secs(5)).execute(&staged, &input).await.unwrap();

        assert_eq!(result.into_stdout().unwrap(), br#"{"n":[1,2],"name":"ada"}"#);
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let (_tmp, _store, staged) = stage("echo boom >&2\nexit 1\n").await;
        let result = sh(Duration::from_secs(5)).execute(&staged, &json!({})).await.unwrap();

        assert_eq!(result.exit_code, Some(1));
        match result.into_stdout().unwrap_err() {
            RunError::ExecutionFailed(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn silent_failure_reports_status() {
        let (_tmp, _store, staged) = stage("exit 3\n").await;
        let result = sh(Duration::from_secs(5)).execute(&staged, &json!({})).await.unwrap();

        match result.into_stdout().unwrap_err() {
            RunError::ExecutionFailed(msg) => assert!(msg.contains("status 3"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn killed_by_signal_is_a_failure() {
        let (_tmp, _store, staged) = stage("kill -9 $$\n").await;
        let result = sh(Duration::from_secs(5)).execute(&staged, &json!({})).await.unwrap();

        assert_eq!(result.exit_code, None);
        assert_eq!(result.signal, Some(9));
        assert!(matches!(result.into_stdout(), Err(RunError::ExecutionFailed(_))));
    }

    #[tokio::test]
    async fn deadline_kills_sleeping_script() {
        let (_tmp, _store, staged) = stage("sleep 10\n").await;
        let started = Instant::now();
        let result = sh(Duration::from_millis(500)).execute(&staged, &json!({})).await.unwrap();

        assert!(result.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        assert!(matches!(result.into_stdout(), Err(RunError::ExecutionTimeout(_))));
    }

    #[tokio::test]
    async fn deadline_kills_background_descendants() {
        // The grandchild inherits stdout; without the group kill the read would block.
        let (_tmp, _store, staged) = stage("sleep 10 &\nwait\n").await;
        let started = Instant::now();
        let result = sh(Duration::from_millis(500)).execute(&staged, &json!({})).await.unwrap();

        assert!(result.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn background_holding_stdout_runs_into_deadline() {
        let (_tmp, _store, staged) = stage("sleep 10 &\necho done\nexit 0\n").await;
        let started = Instant::now();
        let result = sh(Duration::from_millis(500)).execute(&staged, &json!({})).await.unwrap();

        assert!(result.timed_out);
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        assert!(matches!(result.into_stdout(), Err(RunError::ExecutionTimeout(_))));
    }

    #[tokio::test]
    async fn output_past_cap_is_truncated() {
        let (_tmp, _store, staged) = stage("head -c 100000 /dev/zero\n").await;
        let executor = Executor::new("sh", Duration::from_secs(5), 1000);
        let result = executor.execute(&staged, &json!({})).await.unwrap();

        assert_eq!(result.exit_code, Some(0));
        assert!(result.truncated);
        assert_eq!(result.stdout.len(), 1000);
    }

    #[tokio::test]
    async fn unread_input_is_not_an_error() {
        let (_tmp, _store, staged) = stage("exit 0\n").await;
        let big = json!({ "blob": "x".repeat(1 << 20) });
        let result = sh(Duration::from_secs(5)).execute(&staged, &big).await.unwrap();

        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn missing_interpreter_is_execution_failed() {
        let (_tmp, _store, staged) = stage("true\n").await;
        let executor = Executor::new("scriptrun-no-such-interpreter", Duration::from_secs(1), 1024);
        let err = executor.execute(&staged, &json!({})).await.unwrap_err();

        match err {
            RunError::ExecutionFailed(msg) => {
                assert!(msg.contains("scriptrun-no-such-interpreter"), "{}", msg);
                assert!(!msg.contains(staged.path().to_str().unwrap()), "{}", msg);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
