//! Generic child-process execution with graceful-then-forced termination.
//!
//! Adapted from the driving style of `cmd::command::QoveryCommand`: spawn
//! with piped stdout/stderr, drain both concurrently, and on abort send
//! `SIGINT` first, escalating to `SIGKILL` after a grace period.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::config;

/// Why a running command should be aborted.
#[derive(Debug, Clone, Copy)]
pub enum AbortReason {
    Timeout(Duration),
    Canceled,
}

/// Output captured from a completed or aborted command.
#[derive(Debug, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: Option<i32>,
}

/// Runs `program args...` with the given environment, collecting stdout and
/// stderr as UTF-8 (lossily, matching CLI tools which sometimes emit
/// non-UTF-8 terminal control sequences), aborting after `timeout` if set.
///
/// The spawn, drain and wait all happen on a detached task rather than
/// directly in this future: some callers (the Helm driver) must not kill a
/// subprocess just because the caller awaiting `run` was itself cancelled —
/// Helm may be mid-transaction. Dropping the returned future before it
/// resolves therefore leaves the child running to natural completion (or to
/// its own `timeout_duration`-triggered termination) instead of killing it.
pub async fn run(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    timeout_duration: Option<Duration>,
) -> Result<CommandOutput, std::io::Error> {
    tracing::debug!(
        program,
        args = %config::truncate_for_log(&args.join(" ")),
        "spawning command"
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let handle = tokio::spawn(async move {
        let mut child: Child = cmd.spawn()?;
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let stdout_task = tokio::spawn(drain_lines(stdout));
        let stderr_task = tokio::spawn(drain_lines(stderr));

        let wait_fut = child.wait();
        let status = match timeout_duration {
            Some(t) => match timeout(t, wait_fut).await {
                Ok(status) => Some(status?),
                Err(_) => {
                    kill_gracefully(&mut child).await;
                    None
                }
            },
            None => Some(wait_fut.await?),
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok::<CommandOutput, std::io::Error>(CommandOutput {
            stdout,
            stderr,
            status: status.and_then(|s| s.code()),
        })
    });

    match handle.await {
        Ok(result) => result,
        Err(join_err) => Err(std::io::Error::other(join_err)),
    }
}

async fn drain_lines<R: tokio::io::AsyncRead + Unpin>(reader: R) -> String {
    let mut out = String::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Sends `SIGINT`, waits up to `grace`, then escalates to killing the child
/// outright if it has not exited.
async fn kill_gracefully(child: &mut Child) {
    const GRACE: Duration = Duration::from_secs(5);
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is a live child pid owned by `child`; SIGINT merely
        // requests termination.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
    }
    if timeout(GRACE, child.wait()).await.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = run("sh", &["-c".into(), "echo hi".into()], &[], None)
            .await
            .unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.status, Some(0));
    }

    #[tokio::test]
    async fn times_out_long_running_command() {
        let out = run(
            "sh",
            &["-c".into(), "sleep 5".into()],
            &[],
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();
        assert_eq!(out.status, None);
    }
}
