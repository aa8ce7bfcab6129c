use std::path::PathBuf;

/// Errors that are expected in the course of normal sandbox operation and must
/// propagate to the caller unchanged rather than being wrapped as [`SandboxError::Unexpected`].
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("output exceeded the configured limit; truncated output retained")]
    OutputLimitExceeded { stdout: Vec<u8>, stderr: Vec<u8> },

    #[error("permission denied")]
    PermissionDenied,

    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("path is a directory: {0}")]
    IsADirectory(PathBuf),

    #[error("output could not be decoded as utf-8")]
    Decoding(#[from] std::string::FromUtf8Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("executable not found in container: {0}")]
    ExecutableNotFound(String),

    #[error("pod reported an error: {0}")]
    PodError(String),

    #[error("return code unavailable: {0}")]
    ReturnCodeUnavailable(String),

    #[error("kubernetes exec channel error: {0}")]
    Channel(#[from] kube::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the Helm driver.
#[derive(Debug, thiserror::Error)]
pub enum HelmError {
    #[error("helm install failed: {stderr}")]
    InstallFailed { stderr: String },

    #[error("helm install timed out waiting for the release to become ready")]
    InstallTimeout,

    #[error(
        "resourcequota conflict while applying release (retryable): {stderr}"
    )]
    ResourceQuotaConflict { stderr: String },

    #[error("helm uninstall failed: {stderr}")]
    UninstallFailed { stderr: String },

    #[error("failed to spawn helm: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to parse helm JSON output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while validating that the environment is usable at all.
#[derive(Debug, thiserror::Error)]
pub enum PrerequisiteError {
    #[error(
        "k8s sandbox environments require helm (CLI) version >= {minimum}. {detail} \
         See https://helm.sh/docs/intro/install/"
    )]
    Helm { minimum: String, detail: String },
}

/// Errors raised while resolving cluster access (kubeconfig, contexts, namespaces).
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("unknown kubeconfig context: {0}")]
    UnknownContext(String),

    #[error("no current kubeconfig context is set")]
    NoCurrentContext,

    #[error("failed to load kubeconfig: {0}")]
    Load(#[from] kube::config::KubeconfigError),

    #[error("failed to build client: {0}")]
    Client(#[from] kube::Error),
}

/// The top-level error surfaced by the Sandbox Facade.
///
/// Every variant that maps from an "expected" subsystem error is re-exposed
/// unchanged; anything else observed while driving a pod operation is wrapped
/// in [`SandboxError::Unexpected`] with the pod/task context that produced it.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Helm(#[from] HelmError),

    #[error(transparent)]
    Prerequisite(#[from] PrerequisiteError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("no pods found for release {release}")]
    NoPodsForRelease { release: String },

    #[error("unexpected error while operating on pod {pod} (task {task}): {source}")]
    Unexpected {
        pod: String,
        task: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type ExecResult<T> = Result<T, ExecError>;
pub type HelmResult<T> = Result<T, HelmError>;
pub type SandboxResult<T> = Result<T, SandboxError>;
