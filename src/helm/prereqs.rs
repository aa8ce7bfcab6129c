//! Validates that a usable `helm` binary is on `PATH` before anything else
//! in this crate touches the cluster.

use semver::Version;

use crate::command;
use crate::error::PrerequisiteError;

/// Helm's `--ignore-not-found` uninstall flag shipped in 3.13.0 (Sept 2023)
/// and this crate's uninstall path depends on it.
pub const MINIMUM_HELM_VERSION: &str = "3.13.0";

pub async fn validate_prereqs() -> Result<(), PrerequisiteError> {
    validate_helm().await
}

async fn validate_helm() -> Result<(), PrerequisiteError> {
    let output = command::run("helm", &["version".into(), "--short".into()], &[], None)
        .await
        .map_err(|err| {
            let detail = if err.kind() == std::io::ErrorKind::NotFound {
                "Helm is not installed.".to_string()
            } else {
                tracing::warn!(error = %err, "unexpected error while executing `helm version`");
                "Failed to determine which version of helm is installed.".to_string()
            };
            PrerequisiteError::Helm {
                minimum: MINIMUM_HELM_VERSION.to_string(),
                detail,
            }
        })?;

    let installed = parse_version(output.stdout.trim()).map_err(|_| PrerequisiteError::Helm {
        minimum: MINIMUM_HELM_VERSION.to_string(),
        detail: "Failed to determine which version of helm is installed.".to_string(),
    })?;
    let minimum = Version::parse(MINIMUM_HELM_VERSION).expect("valid semver literal");
    if installed < minimum {
        return Err(PrerequisiteError::Helm {
            minimum: MINIMUM_HELM_VERSION.to_string(),
            detail: format!("Found version {installed}."),
        });
    }
    Ok(())
}

/// Parses Helm's `--short` version output, e.g. `v3.15.3+g3bb50bb`.
fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    let stripped = raw.strip_prefix('v').unwrap_or(raw);
    Version::parse(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_short_version() {
        let v = parse_version("v3.15.3+g3bb50bb").unwrap();
        assert_eq!(v.major, 3);
        assert_eq!(v.minor, 15);
        assert_eq!(v.patch, 3);
    }

    #[test]
    fn parses_version_without_leading_v() {
        let v = parse_version("3.13.0").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (3, 13, 0));
    }

    #[test]
    fn rejects_below_minimum() {
        let installed = parse_version("v3.12.0").unwrap();
        let minimum = Version::parse(MINIMUM_HELM_VERSION).unwrap();
        assert!(installed < minimum);
    }
}
