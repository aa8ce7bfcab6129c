//! Binary-safe remote file writes.
//!
//! The exec protocol has no client-initiated stdin close, so the remote
//! side is told exactly how many bytes to expect (`head -c <size>`) and
//! terminates naturally once it has read them; the source is streamed in
//! 1 MiB chunks because larger single writes have been observed to hit
//! TLS-stream EOF in practice.

use std::path::Path;

use k8s_openapi::api::core::v1::Pod as K8sPod;
use kube::api::Api;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config;
use crate::error::ExecError;
use crate::pod::{exec_channel, shell_quote, PodInfo};

pub async fn write_file(
    api: &Api<K8sPod>,
    pod: &PodInfo,
    path: &Path,
    contents: &[u8],
) -> Result<(), ExecError> {
    let parent = path.parent().unwrap_or(Path::new("/"));
    let script = format!(
        "mkdir -p {} && head -c {} > {}",
        shell_quote(&parent.display().to_string()),
        contents.len(),
        shell_quote(&path.display().to_string()),
    );
    let argv = vec!["/bin/sh".to_string(), "-c".to_string(), script];

    let mut process = exec_channel::open(api, &pod.name, pod.container.as_deref(), &argv, true).await?;

    {
        let mut stdin = exec_channel::expect_channel(process.stdin(), "stdin")?;
        for chunk in contents.chunks(config::WRITE_CHUNK_SIZE) {
            stdin.write_all(chunk).await?;
        }
        stdin.shutdown().await?;
    }

    let mut stderr = String::new();
    if let Some(mut stderr_stream) = process.stderr() {
        let _ = stderr_stream.read_to_string(&mut stderr).await;
    }
    // drain stdout so the channel can close; writes don't use it.
    if let Some(mut stdout_stream) = process.stdout() {
        let mut sink = Vec::new();
        let _ = stdout_stream.read_to_end(&mut sink).await;
    }

    process.join().await.map_err(ExecError::Channel)?;

    let status = match process.take_status() {
        Some(fut) => fut.await,
        None => None,
    };
    let returncode = match status {
        Some(status) => exec_channel::extract_return_code(&status).unwrap_or(1),
        None => 0,
    };

    if returncode != 0 {
        classify_error(&stderr, path)?;
    }
    Ok(())
}

fn classify_error(stderr: &str, path: &Path) -> Result<(), ExecError> {
    let lower = stderr.to_lowercase();
    if lower.contains("no such file or directory") {
        Err(ExecError::NotFound(path.to_path_buf()))
    } else if lower.contains("permission denied") {
        Err(ExecError::PermissionDenied)
    } else if lower.contains("is a directory") {
        Err(ExecError::IsADirectory(path.to_path_buf()))
    } else {
        Err(ExecError::PodError(stderr.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_permission_denied() {
        let err = classify_error("sh: /root/x: Permission denied", Path::new("/root/x"));
        assert!(matches!(err, Err(ExecError::PermissionDenied)));
    }
}
