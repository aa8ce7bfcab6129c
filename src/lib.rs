//! Kubernetes-backed sandbox environment provider.
//!
//! Materializes ephemeral, isolated execution contexts as Helm releases on a
//! Kubernetes cluster, and exposes each pod they produce as a remote shell
//! and file-transfer endpoint over the pod-exec WebSocket channel.

#[macro_use]
extern crate tracing;

pub mod buffer;
pub mod cluster;
pub mod command;
pub mod compose;
pub mod config;
pub mod error;
pub mod helm;
pub mod pod;
pub mod release;
pub mod sandbox;

pub use error::{ExecError, HelmError, PrerequisiteError, SandboxError};
pub use pod::executor::{ExecOutcome, ExecRequest};
pub use release::{Release, ReleaseManager, ValuesSource};
pub use sandbox::{Sample, SampleConfig, TaskContext};
