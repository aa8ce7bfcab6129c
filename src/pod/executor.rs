//! Shell-script-based command execution with reliable completion detection.
//!
//! The pod-exec channel does not close until every inheritor of stdout and
//! stderr closes, so a naively-run foreground command leaves the channel
//! open forever if anything in the process tree backgrounds itself. The
//! protocol below works around this: the in-pod shell emits a recognizable
//! sentinel once the foreground command truly finishes, carrying the exit
//! code inside it (the shell's own status frame is not observed once the
//! client actively closes the channel in response to the sentinel).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use k8s_openapi::api::core::v1::Pod as K8sPod;
use kube::api::Api;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::buffer::BoundedBuffer;
use crate::config;
use crate::error::ExecError;
use crate::pod::{exec_channel, shell_quote, PodInfo, TIMEOUT_KILL_GRACE};

static SENTINEL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<completed-sentinel-(\d+)>").unwrap());

static RUNUSER_NO_SUCH_USER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"runuser: user \S+ does not exist").unwrap());

/// Parameters for one `exec` call.
pub struct ExecRequest<'a> {
    pub argv: &'a [String],
    pub stdin: Option<&'a [u8]>,
    pub cwd: Option<&'a Path>,
    pub env: &'a HashMap<String, String>,
    pub user: Option<&'a str>,
    pub timeout: Option<Duration>,
}

/// Result of a completed exec.
pub struct ExecOutcome {
    pub success: bool,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `request.argv` inside the pod described by `pod`, driving the
/// sentinel protocol to completion.
pub async fn exec(
    api: &Api<K8sPod>,
    pod: &PodInfo,
    request: ExecRequest<'_>,
) -> Result<ExecOutcome, ExecError> {
    let shell_argv: Vec<String> = match request.user {
        Some(user) => vec![
            "runuser".to_string(),
            "-u".to_string(),
            user.to_string(),
            "/bin/sh".to_string(),
        ],
        None => vec!["/bin/sh".to_string()],
    };

    let script = build_script(&request);

    let mut process = exec_channel::open(
        api,
        &pod.name,
        pod.container.as_deref(),
        &shell_argv,
        true,
    )
    .await?;

    {
        let mut stdin = exec_channel::expect_channel(process.stdin(), "stdin")?;
        stdin.write_all(script.as_bytes()).await?;
        stdin.shutdown().await?;
    }

    let mut stdout_buf = BoundedBuffer::new(config::MAX_EXEC_OUTPUT_SIZE);
    let mut stderr_buf = BoundedBuffer::new(config::MAX_EXEC_OUTPUT_SIZE);
    let mut stdout_stream = exec_channel::expect_channel(process.stdout(), "stdout")?;
    let mut stderr_stream = exec_channel::expect_channel(process.stderr(), "stderr")?;

    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut sentinel_code: Option<i32> = None;
    let mut stdout_chunk = [0u8; 8192];
    let mut stderr_chunk = [0u8; 8192];

    let drain = async {
        loop {
            if stdout_done && stderr_done {
                break;
            }
            // Stderr is drained before stdout on each iteration so that a
            // sentinel observed in stdout is only acted on once no stderr
            // data is pending, matching the documented polling order.
            if !stderr_done {
                match stderr_stream.read(&mut stderr_chunk).await {
                    Ok(0) => stderr_done = true,
                    Ok(n) => {
                        if stderr_buf.push(&stderr_chunk[..n]) {
                            return Err(ExecError::OutputLimitExceeded {
                                stdout: stdout_buf.as_bytes().to_vec(),
                                stderr: stderr_buf.as_bytes().to_vec(),
                            });
                        }
                        continue;
                    }
                    Err(_) => stderr_done = true,
                }
            }
            if !stdout_done {
                match stdout_stream.read(&mut stdout_chunk).await {
                    Ok(0) => stdout_done = true,
                    Ok(n) => {
                        if stdout_buf.push(&stdout_chunk[..n]) {
                            return Err(ExecError::OutputLimitExceeded {
                                stdout: stdout_buf.as_bytes().to_vec(),
                                stderr: stderr_buf.as_bytes().to_vec(),
                            });
                        }
                        if let Some(code) = find_sentinel(stdout_buf.as_bytes()) {
                            sentinel_code = Some(code);
                            stdout_done = true;
                            stderr_done = true;
                        }
                        continue;
                    }
                    Err(_) => stdout_done = true,
                }
            }
        }
        Ok(())
    };

    let timeout_budget = request.timeout.unwrap_or(Duration::from_secs(3600)) + TIMEOUT_KILL_GRACE * 2;
    match tokio::time::timeout(timeout_budget, drain).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ExecError::Timeout(request.timeout.unwrap_or(timeout_budget)));
        }
    }

    // A sentinel means the foreground command has truly finished, but the
    // channel itself may never close on its own if the script left a
    // backgrounded process alive holding stdout/stderr open — waiting on
    // `join()` in that case would hang forever, which is exactly what the
    // sentinel protocol exists to avoid. Only the no-sentinel (natural EOF)
    // path waits for the channel to close.
    let returncode = match sentinel_code {
        Some(code) => {
            drop(process);
            code
        }
        None => {
            process.join().await.map_err(ExecError::Channel)?;
            match process.take_status() {
                Some(status_fut) => match status_fut.await {
                    Some(status) => exec_channel::extract_return_code(&status)?,
                    None => {
                        return Err(ExecError::ReturnCodeUnavailable(
                            "status channel closed without a frame".to_string(),
                        ))
                    }
                },
                None => {
                    return Err(ExecError::ReturnCodeUnavailable(
                        "no status channel available".to_string(),
                    ))
                }
            }
        }
    };

    let stdout_raw = stdout_buf.into_string_lossy_on_truncation()?;
    let stdout_text = strip_sentinel(&stdout_raw);
    let stderr_text = stderr_buf.into_string_lossy_on_truncation()?;

    classify_postprocessing(returncode, &stderr_text, &request)?;

    Ok(ExecOutcome {
        success: returncode == 0,
        returncode,
        stdout: stdout_text,
        stderr: stderr_text,
    })
}

fn build_script(request: &ExecRequest<'_>) -> String {
    let mut script = String::new();
    if let Some(cwd) = request.cwd {
        script.push_str(&format!("cd {} || exit $?\n", shell_quote(&cwd.display().to_string())));
    }
    for (key, value) in request.env {
        script.push_str(&format!("export {}={}\n", key, shell_quote(value)));
    }

    let argv_quoted = request
        .argv
        .iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ");

    let mut pipeline = String::new();
    if let Some(stdin) = request.stdin {
        let encoded = base64::engine::general_purpose::STANDARD.encode(stdin);
        pipeline.push_str(&format!("echo {} | base64 -d | ", shell_quote(&encoded)));
    }
    if let Some(timeout) = request.timeout {
        pipeline.push_str(&format!(
            "timeout -k {}s {}s ",
            TIMEOUT_KILL_GRACE.as_secs(),
            timeout.as_secs()
        ));
    }
    pipeline.push_str(&argv_quoted);

    script.push_str(&pipeline);
    script.push('\n');
    script.push_str("returncode=$?\n");
    script.push_str("sync\n");
    script.push_str("echo -n \"<completed-sentinel-$returncode>\"\n");
    script.push_str("exit $returncode\n");
    script
}

fn find_sentinel(stdout_so_far: &[u8]) -> Option<i32> {
    let text = String::from_utf8_lossy(stdout_so_far);
    SENTINEL_PATTERN
        .captures(&text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn strip_sentinel(stdout: &str) -> String {
    SENTINEL_PATTERN.replace(stdout, "").into_owned()
}

fn classify_postprocessing(
    returncode: i32,
    stderr: &str,
    request: &ExecRequest<'_>,
) -> Result<(), ExecError> {
    if returncode == 124 && request.timeout.is_some() {
        return Err(ExecError::Timeout(request.timeout.unwrap()));
    }
    if returncode == 126 && stderr.to_lowercase().contains("permission denied") {
        return Err(ExecError::PermissionDenied);
    }
    if returncode != 0 && request.user.is_some() {
        if RUNUSER_NO_SUCH_USER.is_match(stderr) {
            return Err(ExecError::Configuration("user does not exist".to_string()));
        }
        if stderr.contains("runuser: may not be used by non-root users") {
            return Err(ExecError::Configuration(
                "container not running as root".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_includes_cd_export_and_sentinel() {
        let env = HashMap::from([("FOO".to_string(), "bar".to_string())]);
        let request = ExecRequest {
            argv: &["echo".to_string(), "hi".to_string()],
            stdin: None,
            cwd: Some(Path::new("/work")),
            env: &env,
            user: None,
            timeout: Some(Duration::from_secs(30)),
        };
        let script = build_script(&request);
        assert!(script.contains("cd '/work' || exit $?"));
        assert!(script.contains("export FOO='bar'"));
        assert!(script.contains("timeout -k 5s 30s"));
        assert!(script.contains("<completed-sentinel-$returncode>"));
    }

    #[test]
    fn stdin_is_base64_piped() {
        let env = HashMap::new();
        let request = ExecRequest {
            argv: &["cat".to_string()],
            stdin: Some(b"hello\x00world"),
            cwd: None,
            env: &env,
            user: None,
            timeout: None,
        };
        let script = build_script(&request);
        assert!(script.contains("base64 -d"));
    }

    #[test]
    fn finds_sentinel_and_strips_it() {
        let stdout = b"hello\n<completed-sentinel-7>".to_vec();
        assert_eq!(find_sentinel(&stdout), Some(7));
        assert_eq!(strip_sentinel("hello\n<completed-sentinel-7>"), "hello\n");
    }

    #[test]
    fn classifies_timeout_exit_code() {
        let env = HashMap::new();
        let request = ExecRequest {
            argv: &["sleep".to_string(), "99".to_string()],
            stdin: None,
            cwd: None,
            env: &env,
            user: None,
            timeout: Some(Duration::from_secs(1)),
        };
        assert!(matches!(
            classify_postprocessing(124, "", &request),
            Err(ExecError::Timeout(_))
        ));
    }

    #[test]
    fn classifies_missing_user_configuration_error() {
        let env = HashMap::new();
        let request = ExecRequest {
            argv: &["true".to_string()],
            stdin: None,
            cwd: None,
            env: &env,
            user: Some("ghost"),
            timeout: None,
        };
        let err = classify_postprocessing(1, "runuser: user ghost does not exist", &request);
        assert!(matches!(err, Err(ExecError::Configuration(_))));
    }
}
