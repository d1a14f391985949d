//! ST-002: YAML parsing and validation.
//!
//! Parses stratus.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Stack name must be usable as a directory name
//! - Each resource passes its handler's schema and cross-attribute checks
//! - Timeout overrides must be non-zero

use super::types::*;
use crate::resources;
use std::path::Path;
use std::sync::LazyLock;

static NAME_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("valid name regex"));

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a stratus.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<StratusConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a stratus.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StratusConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StratusConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }

    if config.name.is_empty() {
        errors.push(ValidationError {
            message: "name must not be empty".to_string(),
        });
    } else if !NAME_RE.is_match(&config.name) {
        errors.push(ValidationError {
            message: format!(
                "name '{}' may only contain letters, digits, '.', '_' and '-'",
                config.name
            ),
        });
    }

    for (id, decl) in &config.resources {
        let handler = resources::handler(decl.resource_type);
        for message in handler.validate(&decl.attributes) {
            errors.push(ValidationError {
                message: format!("resource '{}' ({}): {}", id, decl.resource_type, message),
            });
        }

        for (op, timeout) in [
            ("create", decl.timeouts.create),
            ("update", decl.timeouts.update),
            ("delete", decl.timeouts.delete),
        ] {
            if timeout.is_some_and(|t| t.is_zero()) {
                errors.push(ValidationError {
                    message: format!("resource '{}': {} timeout must be greater than zero", id, op),
                });
            }
        }
    }

    errors
}

/// Parse and validate in one step, joining every error into one message.
pub fn load_config(path: &Path) -> Result<StratusConfig, String> {
    let config = parse_config_file(path)?;
    let errors = validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    let lines: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
    Err(format!(
        "{} has {} validation error(s):\n{}",
        path.display(),
        errors.len(),
        lines.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
version: "1.0"
name: data-platform
resources:
  pods:
    type: aws_eks_fargate_profile
    cluster_name: prod
    fargate_profile_name: default
    pod_execution_role_arn: arn:aws:iam::123456789012:role/pods
    selector:
      - namespace: default
  grant:
    type: aws_redshift_snapshot_copy_grant
    snapshot_copy_grant_name: dr-grant
"#;

    fn messages(yaml: &str) -> Vec<String> {
        let config = parse_config(yaml).unwrap();
        validate_config(&config).into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn test_st002_parse_valid() {
        let config = parse_config(VALID).unwrap();
        assert_eq!(config.name, "data-platform");
        let errors = messages(VALID);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_st002_bad_version() {
        let errors = messages("version: \"2.0\"\nname: test\nresources: {}\n");
        assert!(errors.iter().any(|e| e.contains("version")));
    }

    #[test]
    fn test_st002_bad_name() {
        let errors = messages("version: \"1.0\"\nname: ../etc\nresources: {}\n");
        assert!(errors.iter().any(|e| e.contains("may only contain")), "{errors:?}");
        let errors = messages("version: \"1.0\"\nname: \"\"\nresources: {}\n");
        assert!(errors.iter().any(|e| e.contains("must not be empty")));
    }

    #[test]
    fn test_st002_handler_validation_is_prefixed() {
        let yaml = r#"
version: "1.0"
name: test
resources:
  build:
    type: aws_codebuild_project
    name: api-build
"#;
        let errors = messages(yaml);
        assert!(!errors.is_empty());
        assert!(
            errors
                .iter()
                .all(|e| e.starts_with("resource 'build' (aws_codebuild_project): ")),
            "{errors:?}"
        );
    }

    #[test]
    fn test_st002_zero_timeout() {
        let yaml = r#"
version: "1.0"
name: test
resources:
  grant:
    type: aws_redshift_snapshot_copy_grant
    snapshot_copy_grant_name: dr-grant
    timeouts:
      create: 0
"#;
        let errors = messages(yaml);
        assert_eq!(errors, vec!["resource 'grant': create timeout must be greater than zero"]);
    }

    #[test]
    fn test_st002_unknown_type_is_parse_error() {
        let yaml = "version: \"1.0\"\nname: t\nresources:\n  b:\n    type: aws_s3_bucket\n";
        let err = parse_config(yaml).unwrap_err();
        assert!(err.starts_with("YAML parse error"));
    }

    #[test]
    fn test_st002_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("stratus.yaml");
        std::fs::write(&good, VALID).unwrap();
        assert_eq!(load_config(&good).unwrap().resources.len(), 2);

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "version: \"0.9\"\nname: x\nresources: {}\n").unwrap();
        let err = load_config(&bad).unwrap_err();
        assert!(err.contains("1 validation error(s)"), "{err}");
    }

    #[test]
    fn test_st002_parse_missing_file() {
        let err = parse_config_file(Path::new("/nonexistent/stratus.yaml")).unwrap_err();
        assert!(err.starts_with("failed to read"));
    }
}
