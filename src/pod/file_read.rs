//! Binary-safe remote file reads via `head -c`, bounding the transfer so a
//! misbehaving path can't exhaust memory.

use std::path::Path;

use k8s_openapi::api::core::v1::Pod as K8sPod;
use kube::api::Api;
use tokio::io::AsyncReadExt;

use crate::buffer::BoundedBuffer;
use crate::config;
use crate::error::ExecError;
use crate::pod::{exec_channel, PodInfo};

pub async fn read_file(
    api: &Api<K8sPod>,
    pod: &PodInfo,
    path: &Path,
) -> Result<Vec<u8>, ExecError> {
    let limit = config::MAX_READ_FILE_SIZE;
    let argv = vec![
        "head".to_string(),
        "-c".to_string(),
        (limit + 1).to_string(),
        path.display().to_string(),
    ];

    let mut process = exec_channel::open(api, &pod.name, pod.container.as_deref(), &argv, false).await?;
    let mut stdout_stream = exec_channel::expect_channel(process.stdout(), "stdout")?;
    let mut stderr_stream = exec_channel::expect_channel(process.stderr(), "stderr")?;

    let mut buf = BoundedBuffer::new(limit);
    let mut chunk = [0u8; 8192];
    loop {
        match stdout_stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.push(&chunk[..n]) {
                    return Err(ExecError::OutputLimitExceeded {
                        stdout: buf.as_bytes().to_vec(),
                        stderr: Vec::new(),
                    });
                }
            }
            Err(_) => break,
        }
    }

    let mut stderr = String::new();
    let _ = stderr_stream.read_to_string(&mut stderr).await;

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

    Ok(buf.into_bytes())
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
    fn classifies_not_found() {
        let err = classify_error("head: /missing: No such file or directory", Path::new("/missing"));
        assert!(matches!(err, Err(ExecError::NotFound(_))));
    }

    #[test]
    fn classifies_is_a_directory() {
        let err = classify_error("head: /tmp: Is a directory", Path::new("/tmp"));
        assert!(matches!(err, Err(ExecError::IsADirectory(_))));
    }

    #[test]
    fn classifies_permission_denied() {
        let err = classify_error("head: /root/secret: Permission denied", Path::new("/root/secret"));
        assert!(matches!(err, Err(ExecError::PermissionDenied)));
    }
}
