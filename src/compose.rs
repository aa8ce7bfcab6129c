//! A deliberately partial Docker Compose → Helm values converter.
//!
//! Full Compose fidelity belongs to the external chart/values translator
//! this crate delegates to in production; this stub implements only the
//! contract the built-in chart actually consumes: one entry per service
//! carrying `image`, `command`, `environment` and `ports` when present.
//! Keys with no Kubernetes equivalent (`expose`, `init`, `start_interval`,
//! and similar healthcheck/network/volume fields) are accepted and dropped.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

#[derive(Debug, Deserialize)]
struct ComposeFile {
    #[serde(default)]
    services: std::collections::BTreeMap<String, ComposeService>,
}

#[derive(Debug, Default, Deserialize)]
struct ComposeService {
    image: Option<String>,
    command: Option<Value>,
    environment: Option<Value>,
    ports: Option<Value>,
    // Accepted-and-ignored Compose keys with no Kubernetes equivalent.
    #[allow(dead_code)]
    expose: Option<Value>,
    #[allow(dead_code)]
    init: Option<Value>,
    #[allow(dead_code)]
    stop_signal: Option<Value>,
}

#[derive(Debug, Default, Serialize)]
struct ServiceValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ports: Option<Value>,
}

#[derive(Debug, Default, Serialize)]
struct HelmValues {
    services: std::collections::BTreeMap<String, ServiceValues>,
}

/// Infers whether `path` is a Docker Compose file by name (also matches
/// `docker-compose.yaml`/`.yml`).
pub fn is_docker_compose_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with("compose.yaml") || name.ends_with("compose.yml")
}

/// Converts a Compose file's `services` mapping into the values shape the
/// built-in chart expects.
pub fn convert_compose_to_values(path: &Path) -> std::io::Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    let compose: ComposeFile = serde_yaml::from_str(&raw)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut values = HelmValues::default();
    for (name, service) in compose.services {
        values.services.insert(
            name,
            ServiceValues {
                image: service.image,
                command: service.command,
                environment: service.environment,
                ports: service.ports,
            },
        );
    }

    serde_yaml::to_value(&values).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn recognizes_compose_filenames() {
        assert!(is_docker_compose_file(Path::new("compose.yaml")));
        assert!(is_docker_compose_file(Path::new("docker-compose.yml")));
        assert!(!is_docker_compose_file(Path::new("values.yaml")));
    }

    #[test]
    fn converts_service_image_and_env() {
        let mut file = tempfile::NamedTempFile::with_suffix("-compose.yaml").unwrap();
        writeln!(
            file,
            "services:\n  web:\n    image: nginx:latest\n    environment:\n      FOO: bar\n    expose:\n      - \"80\"\n"
        )
        .unwrap();
        let values = convert_compose_to_values(file.path()).unwrap();
        let web = &values["services"]["web"];
        assert_eq!(web["image"].as_str(), Some("nginx:latest"));
        assert_eq!(web["environment"]["FOO"].as_str(), Some("bar"));
        assert!(web.get("expose").is_none());
    }
}
