//! Environment-driven tunables, read once per value on first access.
//!
//! Mirrors the original's convention of reading `INSPECT_*` variables lazily
//! rather than at process start, so tests can set them per-case.

use std::env;
use std::num::NonZeroUsize;

fn positive_usize(var: &str, default: usize) -> usize {
    match env::var(var) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::warn!(var, raw, "ignoring malformed value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// `INSPECT_HELM_TIMEOUT`, seconds. Default 600.
pub fn helm_timeout_secs() -> u64 {
    positive_usize("INSPECT_HELM_TIMEOUT", 600) as u64
}

/// `INSPECT_MAX_HELM_INSTALL`. Default 8.
pub fn max_helm_install() -> usize {
    positive_usize("INSPECT_MAX_HELM_INSTALL", 8)
}

/// `INSPECT_MAX_HELM_UNINSTALL`. Default 8.
pub fn max_helm_uninstall() -> usize {
    positive_usize("INSPECT_MAX_HELM_UNINSTALL", 8)
}

/// `INSPECT_MAX_POD_OPS`. Default `4 * logical CPUs`.
pub fn max_pod_ops() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    positive_usize("INSPECT_MAX_POD_OPS", 4 * cpus)
}

/// `INSPECT_K8S_LOG_TRUNCATION_THRESHOLD`. Default 1000.
pub fn log_truncation_threshold() -> usize {
    positive_usize("INSPECT_K8S_LOG_TRUNCATION_THRESHOLD", 1000)
}

/// Maximum bytes retained from a single exec's stdout/stderr stream.
pub const MAX_EXEC_OUTPUT_SIZE: usize = 10 * 1024 * 1024;

/// Maximum bytes read back from a remote file via `read_file`.
pub const MAX_READ_FILE_SIZE: usize = 100 * 1024 * 1024;

/// Chunk size used when streaming a file into the remote exec's stdin.
pub const WRITE_CHUNK_SIZE: usize = 1024 * 1024;

/// Truncates a string for inclusion in a structured log record.
pub fn truncate_for_log(value: &str) -> String {
    let threshold = log_truncation_threshold();
    if value.len() <= threshold {
        value.to_string()
    } else {
        format!("{}… ({} bytes total)", &value[..threshold], value.len())
    }
}
