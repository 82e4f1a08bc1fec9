//! External process orchestration (component B). Grounded on the teacher's
//! `process_ext::run_command_with_timeout_capture_stderr`, ported from a
//! blocking-thread `try_wait` poll loop to async `tokio::process` so it can
//! run directly on a coordinator worker task, and extended with cooperative
//! cancellation (spec §5: "kills the child tree on trigger").

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClopError, ClopResult};

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub fail_on_nonzero: bool,
    pub env_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Callback invoked per UTF-8 line of stdout/stderr as the child produces it.
/// Must be cheap and non-blocking (spec §5: subscriber callbacks are a
/// suspension point but must never stall the pipeline).
pub type LineSink = Box<dyn FnMut(&str) + Send>;

/// Spawn `executable` with `args` passed as a literal argument list (never
/// shell-interpolated). Honours `cancellation` and `options.timeout` by
/// killing the whole child process, never leaking it on any exit path.
pub async fn run(
    executable: &str,
    args: &[String],
    options: &ProcessOptions,
    cancellation: CancellationToken,
    mut on_stdout: Option<LineSink>,
    mut on_stderr: Option<LineSink>,
) -> ClopResult<ProcessOutput> {
    debug!(executable, ?args, "spawning process");

    let mut cmd = Command::new(executable);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &options.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &options.env_overrides {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ClopError::ToolNotFound(executable.to_string())
        } else {
            ClopError::SpawnFailed(e.to_string())
        }
    })?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    let mut stdout_buf = String::new();
    let mut stderr_buf = String::new();
    let mut stdout_done = false;
    let mut stderr_done = false;

    let deadline = options
        .timeout
        .map(|d| Box::pin(tokio::time::sleep(d)))
        .unwrap_or_else(|| Box::pin(tokio::time::sleep(Duration::MAX)));
    tokio::pin!(deadline);

    let status = loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ClopError::Cancelled);
            }
            _ = &mut deadline, if options.timeout.is_some() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ClopError::DeadlineExceeded(options.timeout.unwrap()));
            }
            line = stdout_lines.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(l)) => {
                        if let Some(cb) = on_stdout.as_mut() { cb(&l); }
                        stdout_buf.push_str(&l);
                        stdout_buf.push('\n');
                    }
                    _ => stdout_done = true,
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(l)) => {
                        if let Some(cb) = on_stderr.as_mut() { cb(&l); }
                        stderr_buf.push_str(&l);
                        stderr_buf.push('\n');
                    }
                    _ => stderr_done = true,
                }
            }
            result = child.wait(), if stdout_done && stderr_done => {
                break result.map_err(ClopError::Io)?;
            }
        }
    };

    let exit_code = status.code();
    if options.fail_on_nonzero && !status.success() {
        let snippet = stderr_buf.chars().take(2048).collect::<String>();
        return Err(ClopError::NonZeroExit(exit_code, snippet));
    }

    Ok(ProcessOutput {
        exit_code,
        stdout: stdout_buf,
        stderr: stderr_buf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_simple_command_and_captures_stdout() {
        let out = run(
            "echo",
            &["hello".to_string()],
            &ProcessOptions::default(),
            CancellationToken::new(),
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn missing_executable_yields_tool_not_found() {
        let err = run(
            "clop-definitely-not-a-real-binary",
            &[],
            &ProcessOptions::default(),
            CancellationToken::new(),
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClopError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_when_requested() {
        let options = ProcessOptions {
            fail_on_nonzero: true,
            ..Default::default()
        };
        let err = run(
            "false",
            &[],
            &options,
            CancellationToken::new(),
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClopError::NonZeroExit(_, _)));
    }

    #[tokio::test]
    async fn cancellation_token_aborts_long_running_child() {
        let token = CancellationToken::new();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token_clone.cancel();
        });
        let err = run(
            "sleep",
            &["5".to_string()],
            &ProcessOptions::default(),
            token,
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClopError::Cancelled));
    }

    #[tokio::test]
    async fn timeout_kills_child_and_reports_deadline_exceeded() {
        let options = ProcessOptions {
            timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let err = run(
            "sleep",
            &["5".to_string()],
            &options,
            CancellationToken::new(),
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClopError::DeadlineExceeded(_)));
    }
}
