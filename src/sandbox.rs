//! Implements the sandbox-environment-provider contract used by the
//! evaluation harness: one-time task setup, per-sample pod provisioning,
//! exec/file operations routed through the dispatcher, and layered cleanup.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod as K8sPod;
use kube::api::{Api, ListParams};

use crate::compose;
use crate::error::{ExecError, SandboxError};
use crate::helm::HelmDriver;
use crate::pod::dispatcher::PodOpDispatcher;
use crate::pod::executor::{ExecOutcome, ExecRequest};
use crate::pod::{Pod, PodInfo};
use crate::release::{Release, ReleaseManager, ValuesSource};

/// Chart shipped with this crate for samples that don't bring their own.
pub const DEFAULT_CHART_PATH: &str = "charts/sandbox";

/// Config file basenames the harness checks for, in order, when it resolves
/// a sample's values file from a task directory.
pub const CONFIG_FILE_NAMES: &[&str] = &["values.yaml", "helm-values.yaml"];

/// Per-task state: one [`ReleaseManager`] and one [`PodOpDispatcher`] shared
/// across every sample the task runs.
pub struct TaskContext {
    pub task_name: String,
    helm: Arc<HelmDriver>,
    manager: Arc<ReleaseManager>,
    dispatcher: Arc<PodOpDispatcher>,
}

impl TaskContext {
    /// Validates prerequisites and constructs the per-task manager.
    pub async fn init(task_name: impl Into<String>) -> Result<Self, SandboxError> {
        crate::helm::prereqs::validate_prereqs().await?;
        let helm = Arc::new(HelmDriver::new());
        Ok(Self {
            task_name: task_name.into(),
            manager: Arc::new(ReleaseManager::new(helm.clone())),
            helm,
            dispatcher: Arc::new(PodOpDispatcher::new()),
        })
    }

    /// Uninstalls every release still tracked for this task. When
    /// `cleanup` is `false`, prints manual cleanup instructions instead.
    pub async fn cleanup(&self, cleanup: bool) {
        self.manager.uninstall_all(!cleanup).await;
    }

    /// Basenames the harness looks for, in order, when resolving a sample's
    /// values file from its task directory.
    pub fn config_files() -> &'static [&'static str] {
        CONFIG_FILE_NAMES
    }
}

/// Per-sample configuration resolved from the evaluation's declared config.
#[derive(Default)]
pub struct SampleConfig {
    pub chart_path: Option<PathBuf>,
    pub values_path: Option<PathBuf>,
    pub context: Option<String>,
    pub namespace: Option<String>,
}

/// One provisioned sample: the release that was installed and every pod it
/// exposed, keyed by the name declared via the `inspect/service` pod label.
pub struct Sample {
    task: Arc<TaskContext>,
    release: Arc<Release>,
    pods: HashMap<String, Pod>,
    order: Vec<String>,
}

impl Sample {
    /// Resolves the sample's values source, installs its release, and maps
    /// every labelled pod the release produced.
    pub async fn init(task: Arc<TaskContext>, config: SampleConfig) -> Result<Self, SandboxError> {
        let using_default_chart = config.chart_path.is_none();
        let chart = config
            .chart_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHART_PATH));

        validate_chart_path(&chart).await?;
        if let Some(path) = &config.values_path {
            validate_values_path(path).await?;
        }

        let values = match &config.values_path {
            None => ValuesSource::None,
            Some(path) if compose::is_docker_compose_file(path) => {
                if !using_default_chart {
                    return Err(SandboxError::InvalidConfiguration(
                        "a Docker Compose values file may only be used with the built-in chart"
                            .to_string(),
                    ));
                }
                ValuesSource::GeneratedFromCompose(path.clone())
            }
            Some(path) => ValuesSource::StaticFile(path.clone()),
        };

        let namespace = match &config.namespace {
            Some(ns) => ns.clone(),
            None => crate::cluster::default_namespace(config.context.as_deref())
                .map_err(|e| SandboxError::InvalidConfiguration(e.to_string()))?,
        };

        let release = Release::new(
            task.task_name.clone(),
            chart.display().to_string(),
            values,
            config.context.clone(),
            namespace,
        );

        let release = task.manager.install(release).await?;

        let pods = list_release_pods(&task, &release).await?;
        if pods.is_empty() {
            return Err(SandboxError::NoPodsForRelease {
                release: release.name.clone(),
            });
        }

        use itertools::Itertools;
        let mut order: Vec<String> = pods.keys().cloned().sorted().collect();
        if let Some(pos) = order.iter().position(|n| n == "default") {
            let default = order.remove(pos);
            order.insert(0, default);
        }

        Ok(Self {
            task,
            release,
            pods,
            order,
        })
    }

    /// Names of the sandboxes exposed by this sample, `"default"` first
    /// when present.
    pub fn service_names(&self) -> &[String] {
        &self.order
    }

    fn pod(&self, name: Option<&str>) -> Result<&Pod, SandboxError> {
        let key = name.unwrap_or("default");
        self.pods
            .get(key)
            .ok_or_else(|| SandboxError::InvalidConfiguration(format!("no such sandbox service: {key}")))
    }

    /// Executes `request` inside the named service's pod (or `"default"`).
    /// Errors from [`ExecError`] propagate unchanged; anything else is
    /// wrapped as [`SandboxError::Unexpected`] with pod/task context.
    pub async fn exec(
        &self,
        name: Option<&str>,
        request: ExecRequest<'_>,
    ) -> Result<ExecOutcome, SandboxError> {
        let pod = self.pod(name)?.clone();
        let pod_name = pod.info.name.clone();
        let task_name = self.task.task_name.clone();
        let outcome = self
            .task
            .dispatcher
            .submit(async move { pod.exec(request).await })
            .await;
        outcome.map_err(|e| wrap_exec_error(e, &pod_name, &task_name))
    }

    pub async fn read_file(&self, name: Option<&str>, path: &Path) -> Result<Vec<u8>, SandboxError> {
        let pod = self.pod(name)?.clone();
        let pod_name = pod.info.name.clone();
        let task_name = self.task.task_name.clone();
        let path = path.to_path_buf();
        let result = self
            .task
            .dispatcher
            .submit(async move { pod.read_file(&path).await })
            .await;
        result.map_err(|e| wrap_exec_error(e, &pod_name, &task_name))
    }

    pub async fn write_file(
        &self,
        name: Option<&str>,
        path: &Path,
        contents: &[u8],
    ) -> Result<(), SandboxError> {
        let pod = self.pod(name)?.clone();
        let pod_name = pod.info.name.clone();
        let task_name = self.task.task_name.clone();
        let path = path.to_path_buf();
        let contents = contents.to_vec();
        let result = self
            .task
            .dispatcher
            .submit(async move { pod.write_file(&path, &contents).await })
            .await;
        result.map_err(|e| wrap_exec_error(e, &pod_name, &task_name))
    }

    /// Tears down this sample's release. When `interrupted` is set, defers
    /// to the batched teardown in [`TaskContext::cleanup`] instead, since a
    /// single progress report for the whole task reads better than one per
    /// sample when everything is being torn down at once.
    pub async fn cleanup(&self, interrupted: bool) -> Result<(), SandboxError> {
        if interrupted {
            return Ok(());
        }
        self.task.manager.uninstall(&self.release, true).await?;
        Ok(())
    }
}

/// Expected errors propagate verbatim; anything else is logged at ERROR and
/// wrapped with the pod/task context that produced it.
fn wrap_exec_error(err: ExecError, pod: &str, task: &str) -> SandboxError {
    match err {
        ExecError::Timeout(_)
        | ExecError::OutputLimitExceeded { .. }
        | ExecError::PermissionDenied
        | ExecError::NotFound(_)
        | ExecError::IsADirectory(_)
        | ExecError::Decoding(_)
        | ExecError::Configuration(_)
        | ExecError::ExecutableNotFound(_)
        | ExecError::PodError(_)
        | ExecError::ReturnCodeUnavailable(_) => SandboxError::Exec(err),
        other => {
            tracing::error!(pod, task, error = %other, "unexpected error while operating on pod");
            SandboxError::Unexpected {
                pod: pod.to_string(),
                task: task.to_string(),
                source: anyhow::anyhow!(other),
            }
        }
    }
}

/// Confirms `chart` exists, is a directory, and is readable before handing it
/// to `helm install` — a missing or unreadable chart otherwise surfaces only
/// as an opaque Helm CLI failure much later.
async fn validate_chart_path(chart: &Path) -> Result<(), SandboxError> {
    let mut entries = tokio::fs::read_dir(chart).await.map_err(|e| {
        SandboxError::InvalidConfiguration(format!("chart path {}: {e}", chart.display()))
    })?;
    let _ = entries.next_entry().await;
    Ok(())
}

/// Confirms `path` exists and is readable before it is handed to Helm as a
/// values file (or, for a Compose file, before conversion is attempted).
async fn validate_values_path(path: &Path) -> Result<(), SandboxError> {
    tokio::fs::File::open(path).await.map(|_| ()).map_err(|e| {
        SandboxError::InvalidConfiguration(format!("values file {}: {e}", path.display()))
    })
}

async fn list_release_pods(
    task: &TaskContext,
    release: &Release,
) -> Result<HashMap<String, Pod>, SandboxError> {
    let client = crate::cluster::client_for(release.context.as_deref())
        .await
        .map_err(SandboxError::Cluster)?;
    let api: Api<K8sPod> = Api::namespaced(client, &release.namespace);
    let selector = format!("app.kubernetes.io/instance={}", release.name);
    let pods = api
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(|e| SandboxError::Unexpected {
            pod: "<listing>".to_string(),
            task: task.task_name.clone(),
            source: anyhow::anyhow!(e),
        })?;

    let mut seen = HashSet::new();
    let mut out = HashMap::new();
    for pod in pods.items {
        let Some(labels) = pod.metadata.labels.as_ref() else { continue };
        let Some(service_name) = labels.get("inspect/service") else { continue };
        let Some(pod_name) = pod.metadata.name.clone() else { continue };
        if !seen.insert(service_name.clone()) {
            continue;
        }
        let container = pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .map(|c| c.name.clone());
        out.insert(
            service_name.clone(),
            Pod::new(PodInfo {
                name: pod_name,
                namespace: release.namespace.clone(),
                context: release.context.clone(),
                container,
            }),
        );
    }
    Ok(out)
}

/// Standalone CLI cleanup: uninstalls one release by id, or every
/// `inspectSandbox=true` release in the current namespace.
pub async fn cli_cleanup(id: Option<&str>, namespace: &str, context: Option<&str>) -> Result<(), SandboxError> {
    let helm = HelmDriver::new();
    match id {
        Some(release_name) => {
            helm.uninstall(release_name, namespace, context, false)
                .await
                .map_err(SandboxError::Helm)?;
        }
        None => {
            let releases = helm
                .list_releases(namespace, context)
                .await
                .map_err(SandboxError::Helm)?;
            let futures_iter = releases.iter().map(|name| {
                let helm = &helm;
                async move {
                    if let Err(err) = helm.uninstall(name, namespace, context, false).await {
                        tracing::error!(release = %name, error = %err, "failed to uninstall release");
                    }
                }
            });
            futures::future::join_all(futures_iter).await;
        }
    }
    Ok(())
}
