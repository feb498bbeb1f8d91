use std::path::Path;
use tracing::{debug, warn};

use super::schema::CONFIG_SCHEMA;
use super::types::{ConductorConfig, Settings};
use crate::errors::ConductorError;

/// Largest configuration file accepted, in bytes.
pub const MAX_CONFIG_BYTES: u64 = 1_048_576;

pub async fn parse_config(path: &Path) -> Result<ConductorConfig, ConductorError> {
    if !path.exists() {
        return Err(ConductorError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(ConductorError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

/// Parse configuration text: advisory schema check, typed decoding, then
/// semantic validation. An empty document is the all-defaults config.
pub fn parse_config_str(content: &str) -> Result<ConductorConfig, ConductorError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;
    if yaml.is_null() {
        return Ok(ConductorConfig::default());
    }

    for msg in schema_warnings(&yaml)? {
        warn!(validation_error = %msg, "Config schema warning");
    }

    let config: ConductorConfig = serde_yaml::from_value(yaml)?;
    validate_settings(&Settings::from_config(&config))?;
    Ok(config)
}

/// Resolve settings from an optional config file; no file means defaults.
pub async fn load_settings(path: Option<&Path>) -> Result<Settings, ConductorError> {
    match path {
        Some(p) => {
            let config = parse_config(p).await?;
            debug!(path = %p.display(), "Loaded configuration");
            Ok(Settings::from_config(&config))
        }
        None => Ok(Settings::default()),
    }
}

/// Schema violations as readable messages. They never fail parsing.
fn schema_warnings(yaml: &serde_yaml::Value) -> Result<Vec<String>, ConductorError> {
    let json_value = serde_json::to_value(yaml)
        .map_err(|e| ConductorError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| ConductorError::Config(format!("Schema compilation error: {}", e)))?;

    let messages = match compiled.validate(&json_value) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect(),
    };
    Ok(messages)
}

fn validate_settings(settings: &Settings) -> Result<(), ConductorError> {
    if settings.max_parallel < 1 {
        return Err(ConductorError::Config("scheduler.max_parallel must be at least 1".into()));
    }
    if settings.agent_binary.trim().is_empty() {
        return Err(ConductorError::Config("agent.binary must not be empty".into()));
    }
    if settings.run_timeout.map_or(false, |t| t.is_zero()) {
        return Err(ConductorError::Config("agent.run_timeout_secs must be positive".into()));
    }
    if settings.git_timeout.is_zero() || settings.gh_timeout.is_zero() {
        return Err(ConductorError::Config("helper timeouts must be positive".into()));
    }
    if settings.poll_interval.is_zero() {
        return Err(ConductorError::Config("scheduler.poll_interval_ms must be positive".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_document_is_default() {
        let config = parse_config_str("").unwrap();
        assert_eq!(Settings::from_config(&config), Settings::default());
    }

    #[test]
    fn test_full_document() {
        let config = parse_config_str(
            "agent:\n  binary: claude-dev\n  run_timeout_secs: 300\nscheduler:\n  max_parallel: 5\nhelpers:\n  gh_timeout_secs: 30\n",
        )
        .unwrap();
        let settings = Settings::from_config(&config);
        assert_eq!(settings.agent_binary, "claude-dev");
        assert_eq!(settings.run_timeout, Some(Duration::from_secs(300)));
        assert_eq!(settings.max_parallel, 5);
        assert_eq!(settings.gh_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_zero_parallel_rejected() {
        let err = parse_config_str("scheduler:\n  max_parallel: 0\n").unwrap_err();
        assert!(matches!(err, ConductorError::Config(ref m) if m.contains("max_parallel")));
    }

    #[test]
    fn test_empty_binary_rejected() {
        assert!(parse_config_str("agent:\n  binary: ''\n").is_err());
    }

    #[test]
    fn test_zero_helper_timeout_rejected() {
        assert!(parse_config_str("helpers:\n  git_timeout_secs: 0\n").is_err());
    }

    #[test]
    fn test_unknown_keys_only_warn() {
        let warnings = schema_warnings(&serde_yaml::from_str("extra: 1\n").unwrap()).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(parse_config_str("extra: 1\n").is_ok());
    }

    #[test]
    fn test_wrong_type_is_yaml_error() {
        assert!(matches!(
            parse_config_str("scheduler:\n  max_parallel: many\n"),
            Err(ConductorError::Yaml(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = parse_config(Path::new("/nonexistent/conductor.yaml")).await.unwrap_err();
        assert!(matches!(err, ConductorError::Config(_)));
    }

    #[tokio::test]
    async fn test_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.yaml");
        std::fs::write(&path, format!("# {}\n", "x".repeat(MAX_CONFIG_BYTES as usize))).unwrap();
        assert!(matches!(parse_config(&path).await, Err(ConductorError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_settings_without_file() {
        assert_eq!(load_settings(None).await.unwrap(), Settings::default());
    }
}
