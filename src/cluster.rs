//! Cluster access: load the user's kubeconfig once and vend per-context API
//! clients.
//!
//! `kube::Client` wraps a `tower` service and is cheaply `Clone`, so the
//! per-thread cache below is a memoization of config/discovery work rather
//! than a hard safety requirement (see DESIGN.md for the faithfulness note).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::OnceLock;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;

use crate::error::ClusterError;

/// Process-wide, lazily-populated snapshot of the user's kubeconfig.
/// Never refreshed after first load (documented staleness risk: changes to
/// `~/.kube/config` made after the provider starts are not picked up).
static KUBECONFIG: OnceLock<Kubeconfig> = OnceLock::new();

fn kubeconfig() -> Result<&'static Kubeconfig, ClusterError> {
    if let Some(cfg) = KUBECONFIG.get() {
        return Ok(cfg);
    }
    let loaded = Kubeconfig::read()?;
    Ok(KUBECONFIG.get_or_init(|| loaded))
}

thread_local! {
    static CLIENT_CACHE: RefCell<HashMap<Option<String>, Client>> = RefCell::new(HashMap::new());
}

/// Returns the name of the kubeconfig's current context.
pub fn current_context_name() -> Result<String, ClusterError> {
    let cfg = kubeconfig()?;
    cfg.current_context.clone().ok_or(ClusterError::NoCurrentContext)
}

/// Validates that `context` (if given) names a context present in the
/// kubeconfig. `None` is always valid (defers to the current context).
pub fn validate_context(context: Option<&str>) -> Result<(), ClusterError> {
    validate_context_in(kubeconfig()?, context)
}

fn validate_context_in(cfg: &Kubeconfig, context: Option<&str>) -> Result<(), ClusterError> {
    let Some(name) = context else { return Ok(()) };
    if cfg.contexts.iter().any(|c| c.name == name) {
        Ok(())
    } else {
        Err(ClusterError::UnknownContext(name.to_string()))
    }
}

/// Returns the default namespace configured for `context` (or the current
/// context when `None`), falling back to `"default"`.
pub fn default_namespace(context: Option<&str>) -> Result<String, ClusterError> {
    let cfg = kubeconfig()?;
    let ctx_name = match context {
        Some(name) => name.to_string(),
        None => cfg.current_context.clone().ok_or(ClusterError::NoCurrentContext)?,
    };
    let ns = cfg
        .contexts
        .iter()
        .find(|c| c.name == ctx_name)
        .and_then(|c| c.context.as_ref())
        .and_then(|c| c.namespace.clone())
        .unwrap_or_else(|| "default".to_string());
    Ok(ns)
}

/// Returns a cached client for `context` (or the current context when
/// `None`), building one on first use for this thread.
pub async fn client_for(context: Option<&str>) -> Result<Client, ClusterError> {
    validate_context(context)?;
    let key = context.map(|s| s.to_string());
    if let Some(client) = CLIENT_CACHE.with(|cache| cache.borrow().get(&key).cloned()) {
        return Ok(client);
    }
    let cfg = kubeconfig()?.clone();
    let options = KubeConfigOptions {
        context: context.map(|s| s.to_string()),
        ..Default::default()
    };
    let kube_config = kube::Config::from_custom_kubeconfig(cfg, &options).await?;
    let client = Client::try_from(kube_config)?;
    CLIENT_CACHE.with(|cache| cache.borrow_mut().insert(key, client.clone()));
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::config::NamedContext;

    fn fake_kubeconfig(context_names: &[&str]) -> Kubeconfig {
        Kubeconfig {
            contexts: context_names
                .iter()
                .map(|name| NamedContext {
                    name: name.to_string(),
                    context: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn validate_context_accepts_none_without_consulting_contexts() {
        let cfg = fake_kubeconfig(&[]);
        assert!(validate_context_in(&cfg, None).is_ok());
    }

    #[test]
    fn validate_context_accepts_a_known_context() {
        let cfg = fake_kubeconfig(&["prod", "staging"]);
        assert!(validate_context_in(&cfg, Some("staging")).is_ok());
    }

    #[test]
    fn validate_context_rejects_an_unknown_context() {
        let cfg = fake_kubeconfig(&["prod"]);
        assert!(matches!(
            validate_context_in(&cfg, Some("dev")),
            Err(ClusterError::UnknownContext(name)) if name == "dev"
        ));
    }
}
