//! Thin wrapper over `kube`'s pod-exec WebSocket, plus the return-code
//! extraction rules from the status frame.

use std::sync::Once;

use k8s_openapi::api::core::v1::Pod as K8sPod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, AttachedProcess};

use crate::error::ExecError;

static MISSING_CHANNEL_WARNED: Once = Once::new();

/// Unwraps a stream channel that was requested via [`AttachParams`], warning
/// once per process (not once per call) if the server didn't honor the
/// request instead of panicking — a single diagnosable condition, not
/// something worth flooding logs over on every exec.
pub fn expect_channel<T>(channel: Option<T>, which: &'static str) -> Result<T, ExecError> {
    match channel {
        Some(stream) => Ok(stream),
        None => {
            MISSING_CHANNEL_WARNED.call_once(|| {
                tracing::warn!(channel = which, "exec channel did not provide a requested stream");
            });
            Err(ExecError::PodError(format!(
                "{which} channel unavailable despite being requested"
            )))
        }
    }
}

/// Opens an exec channel running `argv` in `pod_name`, enabling stdin when
/// `stdin` is set. Mirrors the parameter shape the original uses: binary
/// stdout/stderr, generous buffer sizes so a burst of output doesn't stall
/// the in-pod process waiting on a full pipe.
pub async fn open(
    api: &Api<K8sPod>,
    pod_name: &str,
    container: Option<&str>,
    argv: &[String],
    stdin: bool,
) -> Result<AttachedProcess, ExecError> {
    let params = AttachParams {
        container: container.map(str::to_string),
        stdin,
        stdout: true,
        stderr: true,
        tty: false,
        max_stdin_buf_size: Some(1024 * 1024),
        max_stdout_buf_size: Some(1024 * 1024),
        max_stderr_buf_size: Some(1024 * 1024),
    };
    api.exec(pod_name, argv, &params)
        .await
        .map_err(ExecError::Channel)
}

/// Extracts a process return code from the final status frame, per the
/// documented rules: `status=="Success"` maps to 0; otherwise walk
/// `details.causes` for a `reason=="ExitCode"` entry and parse its message
/// as an integer; a "error finding executable" message is a distinct error
/// class since it means the shell itself could not be started.
pub fn extract_return_code(status: &Status) -> Result<i32, ExecError> {
    if status.status.as_deref() == Some("Success") {
        return Ok(0);
    }
    if let Some(details) = &status.details {
        for cause in details.causes.iter().flatten() {
            if cause.reason.as_deref() == Some("ExitCode") {
                if let Some(message) = &cause.message {
                    if message.contains("error finding executable") {
                        return Err(ExecError::ExecutableNotFound(message.clone()));
                    }
                    if let Ok(code) = message.parse::<i32>() {
                        return Ok(code);
                    }
                }
            }
        }
    }
    Err(ExecError::ReturnCodeUnavailable(
        status.message.clone().unwrap_or_else(|| "malformed status frame".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusDetails, StatusCause};

    fn status_with_cause(status_field: &str, reason: &str, message: &str) -> Status {
        Status {
            status: Some(status_field.to_string()),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    field: None,
                    message: Some(message.to_string()),
                    reason: Some(reason.to_string()),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn success_status_maps_to_zero() {
        let status = Status {
            status: Some("Success".to_string()),
            ..Default::default()
        };
        assert_eq!(extract_return_code(&status).unwrap(), 0);
    }

    #[test]
    fn exit_code_cause_is_parsed() {
        let status = status_with_cause("Failure", "ExitCode", "137");
        assert_eq!(extract_return_code(&status).unwrap(), 137);
    }

    #[test]
    fn missing_executable_is_its_own_error_class() {
        let status = status_with_cause(
            "Failure",
            "ExitCode",
            "command terminated with exec: error finding executable",
        );
        assert!(matches!(
            extract_return_code(&status),
            Err(ExecError::ExecutableNotFound(_))
        ));
    }

    #[test]
    fn unrecognized_status_is_unavailable() {
        let status = Status {
            status: Some("Failure".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            extract_return_code(&status),
            Err(ExecError::ReturnCodeUnavailable(_))
        ));
    }
}
