//! Release identity, values sourcing, and the per-task tracked-release
//! ledger that backs cleanup guarantees.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::distr::{Alphanumeric, SampleString};
use tokio::sync::Mutex;

use crate::compose;
use crate::error::HelmError;
use crate::helm::{HelmDriver, InstallRequest};

/// Generates an 8-character lowercase-alphanumeric release identifier.
///
/// 36^8 (~2.8e12) combinations; collision probability within one namespace's
/// lifetime is treated as negligible, mirroring the original's `shortuuid`.
pub fn generate_release_name() -> String {
    Alphanumeric
        .sample_string(&mut rand::rng(), 8)
        .to_lowercase()
}

/// Where a release's `values.yaml` comes from.
pub enum ValuesSource {
    None,
    StaticFile(PathBuf),
    GeneratedFromCompose(PathBuf),
}

/// A scoped handle to a resolved values file path. For the generated variant
/// the backing temp file is removed when this guard drops.
pub struct ValuesFileGuard {
    path: Option<PathBuf>,
    _temp: Option<tempfile::NamedTempFile>,
}

impl ValuesFileGuard {
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ValuesSource {
    /// Acquires a filesystem path valid for the lifetime of the returned
    /// guard. `GeneratedFromCompose` converts the compose file and writes a
    /// fresh temp file on every call.
    pub async fn acquire(&self) -> Result<ValuesFileGuard, std::io::Error> {
        match self {
            ValuesSource::None => Ok(ValuesFileGuard {
                path: None,
                _temp: None,
            }),
            ValuesSource::StaticFile(path) => Ok(ValuesFileGuard {
                path: Some(path.clone()),
                _temp: None,
            }),
            ValuesSource::GeneratedFromCompose(compose_path) => {
                let values = compose::convert_compose_to_values(compose_path)?;
                let yaml = serde_yaml::to_string(&values)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                let mut file = tempfile::NamedTempFile::new()?;
                use std::io::Write;
                file.write_all(yaml.as_bytes())?;
                file.flush()?;
                let path = file.path().to_path_buf();
                Ok(ValuesFileGuard {
                    path: Some(path),
                    _temp: Some(file),
                })
            }
        }
    }
}

/// One Helm deployment, immutable after construction.
pub struct Release {
    pub task_name: String,
    pub chart: String,
    pub values: ValuesSource,
    pub context: Option<String>,
    pub namespace: String,
    pub name: String,
}

impl Release {
    pub fn new(
        task_name: impl Into<String>,
        chart: impl Into<String>,
        values: ValuesSource,
        context: Option<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            chart: chart.into(),
            values,
            context,
            namespace: namespace.into(),
            name: generate_release_name(),
        }
    }
}

/// Tracks every Release whose install has been initiated for one evaluation
/// context (task run), guaranteeing that nothing leaks if the process shuts
/// down cleanly: a release is appended *before* install is awaited and only
/// removed once uninstall actually completes.
pub struct ReleaseManager {
    helm: Arc<HelmDriver>,
    tracked: Mutex<Vec<Arc<Release>>>,
}

impl ReleaseManager {
    pub fn new(helm: Arc<HelmDriver>) -> Self {
        Self {
            helm,
            tracked: Mutex::new(Vec::new()),
        }
    }

    /// Installs `release`, tracking it before the install is awaited so a
    /// mid-install failure still leaves it eligible for cleanup.
    ///
    /// A [`scopeguard`] guards only the `self.helm.install(..)` await itself:
    /// if this future is dropped while that await is still pending (the
    /// caller cancelled, e.g. the sample timed out) the guard's drop closure
    /// fires a best-effort uninstall of the same release name, since a
    /// cancelled install may have left a half-applied Helm release behind.
    /// An *ordinary* install failure (the await completes with `Err`) is not
    /// treated the same way: the guard is defused before the error is
    /// returned, leaving cleanup to the next task-level sweep, matching the
    /// cancellation-vs-ordinary-failure distinction the release lifecycle
    /// contract draws.
    pub async fn install(&self, release: Release) -> Result<Arc<Release>, HelmError> {
        let release = Arc::new(release);
        self.tracked.lock().await.push(release.clone());

        let guard = release
            .values
            .acquire()
            .await
            .map_err(|e| HelmError::InstallFailed {
                stderr: format!("failed to prepare values file: {e}"),
            })?;
        let req = InstallRequest {
            release_name: &release.name,
            chart: &release.chart,
            namespace: &release.namespace,
            task_name: &release.task_name,
            values_path: guard.path(),
            context: release.context.as_deref(),
        };

        let cancel_guard = scopeguard::guard((release.clone(), self.helm.clone()), |(release, helm)| {
            tokio::spawn(async move {
                if let Err(err) = helm
                    .uninstall(&release.name, &release.namespace, release.context.as_deref(), true)
                    .await
                {
                    tracing::error!(release = %release.name, error = %err, "cleanup uninstall after cancelled install did not complete");
                }
            });
        });
        let install_result = self.helm.install(&req).await;
        match install_result {
            Ok(()) => {
                scopeguard::ScopeGuard::into_inner(cancel_guard);
                Ok(release)
            }
            Err(err) => {
                scopeguard::ScopeGuard::into_inner(cancel_guard);
                Err(err)
            }
        }
    }

    /// Uninstalls `release` and drops it from the tracked list.
    pub async fn uninstall(&self, release: &Release, quiet: bool) -> Result<(), HelmError> {
        let result = self
            .helm
            .uninstall(&release.name, &release.namespace, release.context.as_deref(), quiet)
            .await;
        let mut tracked = self.tracked.lock().await;
        tracked.retain(|r| r.name != release.name);
        result
    }

    /// Prints a cleanup-instructions table (when `print_only`) or
    /// concurrently uninstalls every tracked release, swallowing individual
    /// failures so one bad release cannot block the rest.
    pub async fn uninstall_all(&self, print_only: bool) {
        if print_only {
            let tracked = self.tracked.lock().await;
            if tracked.is_empty() {
                return;
            }
            println!("The following releases were not cleaned up automatically:");
            println!("{:<24}{:<24}NAMESPACE", "RELEASE", "TASK");
            for release in tracked.iter() {
                println!(
                    "{:<24}{:<24}{}",
                    release.name, release.task_name, release.namespace
                );
                println!(
                    "  helm uninstall {} --namespace {}",
                    release.name, release.namespace
                );
            }
            return;
        }

        let snapshot: Vec<Arc<Release>> = {
            let mut tracked = self.tracked.lock().await;
            std::mem::take(&mut *tracked)
        };
        let helm = self.helm.clone();
        let futures_iter = snapshot.into_iter().map(|release| {
            let helm = helm.clone();
            async move {
                if let Err(err) = helm
                    .uninstall(&release.name, &release.namespace, release.context.as_deref(), true)
                    .await
                {
                    tracing::error!(release = %release.name, error = %err, "failed to uninstall release during sweep");
                }
            }
        });
        futures::future::join_all(futures_iter).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_names_are_eight_lowercase_alphanumeric_chars() {
        let name = generate_release_name();
        assert_eq!(name.len(), 8);
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn release_names_are_not_trivially_repeated() {
        let a = generate_release_name();
        let b = generate_release_name();
        assert_ne!(a, b);
    }
}
