//! Drives the `helm` CLI to install, upgrade, uninstall and list releases.
//!
//! Mirrors `cmd::helm`'s style of shelling out and parsing JSON output, with
//! bounded concurrency and conflict-retry layered on top per the release
//! lifecycle contract.

pub mod prereqs;

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use retry::delay::Fixed;
use tokio::sync::Semaphore;

use crate::config;
use crate::error::HelmError;

static RESOURCE_QUOTA_CONFLICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)operation cannot be fulfilled on resourcequotas.*the object has been modified")
        .unwrap()
});

const INSTALL_TIMEOUT_MARKER: &str = "INSTALLATION FAILED: context deadline exceeded";

/// Label applied to every release this crate creates, used by cleanup sweeps.
pub const SANDBOX_LABEL: &str = "inspectSandbox=true";

fn classify_install_failure(stderr: &str) -> HelmError {
    if RESOURCE_QUOTA_CONFLICT.is_match(stderr) {
        HelmError::ResourceQuotaConflict {
            stderr: stderr.to_string(),
        }
    } else if stderr.contains(INSTALL_TIMEOUT_MARKER) {
        HelmError::InstallTimeout
    } else {
        HelmError::InstallFailed {
            stderr: stderr.to_string(),
        }
    }
}

/// Options describing one install attempt.
pub struct InstallRequest<'a> {
    pub release_name: &'a str,
    pub chart: &'a str,
    pub namespace: &'a str,
    pub task_name: &'a str,
    pub values_path: Option<&'a std::path::Path>,
    pub context: Option<&'a str>,
}

/// Drives `helm` with independent bounded pools for install and uninstall so
/// that uninstalls are never starved by installs waiting on cluster quota.
pub struct HelmDriver {
    install_permits: Arc<Semaphore>,
    uninstall_permits: Arc<Semaphore>,
}

impl HelmDriver {
    pub fn new() -> Self {
        Self {
            install_permits: Arc::new(Semaphore::new(config::max_helm_install())),
            uninstall_permits: Arc::new(Semaphore::new(config::max_helm_uninstall())),
        }
    }

    /// Installs (or upgrades) `req`, retrying up to 3 attempts with a 5s
    /// delay on a transient resourcequota conflict. The second and later
    /// attempts use `upgrade --install` so partial state from a prior
    /// attempt is reconciled rather than rejected as already-present.
    pub async fn install(&self, req: &InstallRequest<'_>) -> Result<(), HelmError> {
        let _permit = self.install_permits.acquire().await.expect("semaphore open");
        // `Fixed` only drives the delay schedule; the retry loop itself must
        // stay async so a stalled attempt doesn't block other tokio tasks.
        let mut delays = Fixed::from_millis(5_000).take(2);
        let mut attempt = 1u32;
        loop {
            match self.run_install(req, attempt > 1).await {
                Ok(()) => return Ok(()),
                Err(HelmError::ResourceQuotaConflict { stderr }) => {
                    match delays.next() {
                        Some(delay) => {
                            tracing::warn!(attempt, "resourcequota conflict, retrying install");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => return Err(HelmError::ResourceQuotaConflict { stderr }),
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn run_install(&self, req: &InstallRequest<'_>, upgrade: bool) -> Result<(), HelmError> {
        let timeout = config::helm_timeout_secs();
        let mut args: Vec<String> = Vec::new();
        if upgrade {
            args.push("upgrade".into());
            args.push("--install".into());
        } else {
            args.push("install".into());
        }
        args.push(req.release_name.to_string());
        args.push(req.chart.to_string());
        args.push("--namespace".into());
        args.push(req.namespace.to_string());
        args.push("--create-namespace".into());
        args.push("--wait".into());
        args.push("--timeout".into());
        args.push(format!("{timeout}s"));
        args.push("--set".into());
        args.push(format!("annotations.inspectTaskName={}", req.task_name));
        args.push("--labels".into());
        args.push(SANDBOX_LABEL.into());
        if let Some(values) = req.values_path {
            args.push("--values".into());
            args.push(values.display().to_string());
        }
        if let Some(ctx) = req.context {
            args.push("--kube-context".into());
            args.push(ctx.to_string());
        }

        let output = command_run("helm", &args, Some(Duration::from_secs(timeout + 30))).await?;
        if output.status == Some(0) {
            Ok(())
        } else {
            Err(classify_install_failure(&output.stderr))
        }
    }

    /// Uninstalls `release_name`. Errors from individual uninstalls are the
    /// caller's responsibility to swallow when sweeping many releases.
    pub async fn uninstall(
        &self,
        release_name: &str,
        namespace: &str,
        context: Option<&str>,
        quiet: bool,
    ) -> Result<(), HelmError> {
        let _permit = self.uninstall_permits.acquire().await.expect("semaphore open");
        let timeout = config::helm_timeout_secs();
        let mut args = vec![
            "uninstall".to_string(),
            release_name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--wait".to_string(),
            "--timeout".to_string(),
            format!("{timeout}s"),
            "--ignore-not-found".to_string(),
        ];
        if let Some(ctx) = context {
            args.push("--kube-context".into());
            args.push(ctx.to_string());
        }
        let output = command_run("helm", &args, Some(Duration::from_secs(timeout + 30))).await?;
        if !quiet {
            if !output.stdout.is_empty() {
                println!("{}", output.stdout);
            }
            if !output.stderr.is_empty() {
                eprintln!("{}", output.stderr);
            }
        }
        if output.status == Some(0) {
            Ok(())
        } else {
            Err(HelmError::UninstallFailed {
                stderr: output.stderr,
            })
        }
    }

    /// Lists release names carrying [`SANDBOX_LABEL`] in `namespace`.
    pub async fn list_releases(
        &self,
        namespace: &str,
        context: Option<&str>,
    ) -> Result<Vec<String>, HelmError> {
        let mut args = vec![
            "list".to_string(),
            "-q".to_string(),
            "--selector".to_string(),
            SANDBOX_LABEL.to_string(),
            "--max".to_string(),
            "0".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        if let Some(ctx) = context {
            args.push("--kube-context".into());
            args.push(ctx.to_string());
        }
        let output = command_run("helm", &args, Some(Duration::from_secs(60))).await?;
        if output.status != Some(0) {
            return Err(HelmError::UninstallFailed {
                stderr: output.stderr,
            });
        }
        Ok(output
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

impl Default for HelmDriver {
    fn default() -> Self {
        Self::new()
    }
}

async fn command_run(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
) -> Result<crate::command::CommandOutput, HelmError> {
    crate::command::run(program, args, &[], timeout)
        .await
        .map_err(HelmError::Spawn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_resourcequota_conflict_as_retryable() {
        let stderr = "Error: UPGRADE FAILED: Operation cannot be fulfilled on \
                       resourcequotas \"compute-resources\": the object has been \
                       modified; please apply your changes to the latest version and try again";
        assert!(matches!(
            classify_install_failure(stderr),
            HelmError::ResourceQuotaConflict { .. }
        ));
    }

    #[test]
    fn classifies_deadline_exceeded_as_timeout() {
        let stderr = "Error: INSTALLATION FAILED: context deadline exceeded";
        assert!(matches!(
            classify_install_failure(stderr),
            HelmError::InstallTimeout
        ));
    }

    #[test]
    fn classifies_other_failures_generically() {
        let stderr = "Error: INSTALLATION FAILED: chart requires kubeVersion";
        assert!(matches!(
            classify_install_failure(stderr),
            HelmError::InstallFailed { .. }
        ));
    }
}
