//! Child-process execution with cancellation and line-streaming output
//! (§4.5, §5, §9 "Process control").
//!
//! The child process handle is acquired as a scoped resource: `kill_on_drop`
//! is always set so an unexpected early return (panic unwinding, an error
//! propagated with `?`) cannot leak a running child. Stdout/stderr are
//! streamed through two reader tasks that forward line events onto a single
//! channel.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// One line of captured output from either stream.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub cancelled: bool,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn { program: String, #[source] source: std::io::Error },
    #[error("io error while running `{program}`: {source}")]
    Io { program: String, #[source] source: std::io::Error },
}

/// Run `program args` to completion, streaming each line through `on_line`
/// as it arrives (used when verbose output is enabled) while always also
/// accumulating the full buffered output for the final [`ProcessOutcome`].
///
/// If `cancel` fires before the child exits, the child is killed and the
/// outcome is returned with `cancelled: true` and no exit code.
pub async fn run_streamed(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
    cancel: CancellationToken,
    mut on_line: impl FnMut(OutputLine) + Send + 'static,
) -> Result<ProcessOutcome, ProcessError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<OutputLine>();
    let tx_out = tx.clone();
    let out_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if tx_out.send(OutputLine { stream: StreamKind::Stdout, line }).is_err() {
                break;
            }
        }
    });
    let err_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if tx.send(OutputLine { stream: StreamKind::Stderr, line }).is_err() {
                break;
            }
        }
    });

    let mut stdout_buf = String::new();
    let mut stderr_buf = String::new();

    let wait_fut = async {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(true);
                }
                maybe_line = rx.recv() => {
                    match maybe_line {
                        Some(ol) => {
                            match ol.stream {
                                StreamKind::Stdout => { stdout_buf.push_str(&ol.line); stdout_buf.push('\n'); }
                                StreamKind::Stderr => { stderr_buf.push_str(&ol.line); stderr_buf.push('\n'); }
                            }
                            on_line(ol);
                        }
                        None => {
                            let status = child.wait().await.map_err(|source| {
                                tracing::warn!(program, error = %source, "failed waiting for child");
                                false
                            });
                            return status;
                        }
                    }
                }
            }
        }
    };

    match wait_fut.await {
        Ok(status) => {
            let _ = out_task.await;
            let _ = err_task.await;
            Ok(ProcessOutcome {
                exit_code: status.code(),
                stdout: stdout_buf,
                stderr: stderr_buf,
                cancelled: false,
            })
        }
        Err(true) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            out_task.abort();
            err_task.abort();
            Ok(ProcessOutcome { exit_code: None, stdout: stdout_buf, stderr: stderr_buf, cancelled: true })
        }
        Err(false) => Err(ProcessError::Io {
            program: program.to_string(),
            source: std::io::Error::other("wait() failed"),
        }),
    }
}

/// Run to completion without streaming individual lines; equivalent to
/// `run_streamed` with a no-op line callback, used in non-verbose mode.
pub async fn run_buffered(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
    cancel: CancellationToken,
) -> Result<ProcessOutcome, ProcessError> {
    run_streamed(program, args, cwd, env, cancel, |_| {}).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn captures_stdout() {
        let cwd = std::env::temp_dir();
        let outcome = run_buffered(
            "sh",
            &["-c".to_string(), "echo hello".to_string()],
            &cwd,
            &HashMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout.trim(), "hello");
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let cwd = std::env::temp_dir();
        let outcome = run_buffered(
            "sh",
            &["-c".to_string(), "exit 7".to_string()],
            &cwd,
            &HashMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.exit_code, Some(7));
    }

    #[tokio::test]
    async fn streaming_invokes_callback_per_line() {
        let cwd = std::env::temp_dir();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let lines_cb = lines.clone();
        let outcome = run_streamed(
            "sh",
            &["-c".to_string(), "echo a; echo b".to_string()],
            &cwd,
            &HashMap::new(),
            CancellationToken::new(),
            move |ol| lines_cb.lock().unwrap().push(ol.line),
        )
        .await
        .unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(*lines.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn cancellation_kills_child_and_returns_promptly() {
        let cwd = std::env::temp_dir();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel2.cancel();
        });
        let start = std::time::Instant::now();
        let outcome = run_buffered(
            "sh",
            &["-c".to_string(), "sleep 30".to_string()],
            &cwd,
            &HashMap::new(),
            cancel,
        )
        .await
        .unwrap();
        assert!(outcome.cancelled);
        assert!(start.elapsed() < std::time::Duration::from_secs(2));
    }
}
