//! Pod-level execution: the exec WebSocket channel, the command executor
//! that layers a reliable completion protocol on top of it, binary-safe
//! file transfer, and a bounded dispatcher that keeps blocking pod work off
//! the caller's scheduling context.

pub mod dispatcher;
pub mod exec_channel;
pub mod executor;
pub mod file_read;
pub mod file_write;

use std::path::Path;
use std::time::Duration;

use kube::api::Api;
use kube::Client;
use k8s_openapi::api::core::v1::Pod as K8sPod;

use crate::error::ExecError;

/// Immutable identity of one pod this crate can talk to.
#[derive(Debug, Clone, derive_more::Display)]
#[display("{namespace}/{name}")]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub context: Option<String>,
    pub container: Option<String>,
}

/// A stateless handle to a pod; every operation opens its own exec channel.
#[derive(Debug, Clone)]
pub struct Pod {
    pub info: PodInfo,
}

impl Pod {
    pub fn new(info: PodInfo) -> Self {
        Self { info }
    }

    async fn api(&self) -> Result<Api<K8sPod>, ExecError> {
        let client: Client = crate::cluster::client_for(self.info.context.as_deref())
            .await
            .map_err(|e| ExecError::Configuration(e.to_string()))?;
        Ok(Api::namespaced(client, &self.info.namespace))
    }

    /// Runs `argv` under a shell inside the pod; see [`executor`] for the
    /// full completion-detection protocol.
    pub async fn exec(&self, request: executor::ExecRequest<'_>) -> Result<executor::ExecOutcome, ExecError> {
        let api = self.api().await?;
        executor::exec(&api, &self.info, request).await
    }

    /// Reads a remote file's contents into memory, bounded by
    /// `config::MAX_READ_FILE_SIZE`.
    pub async fn read_file(&self, path: &Path) -> Result<Vec<u8>, ExecError> {
        let api = self.api().await?;
        file_read::read_file(&api, &self.info, path).await
    }

    /// Writes `contents` to a remote file, creating parent directories.
    pub async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), ExecError> {
        let api = self.api().await?;
        file_write::write_file(&api, &self.info, path, contents).await
    }
}

/// Shared constant: in-pod timeout grace period before `SIGKILL` under
/// `timeout -k <grace> <T>`.
pub const TIMEOUT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Shell-quotes `value` for safe interpolation into the generated script.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
