use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use crate::storage::checkpoint::ARCHIVE_SUFFIX;
use crate::storage::is_plain_slot;
use regex::Regex;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let config = parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;

    Ok(config)
}

/// Parse and validate a config from YAML text.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml = expand_env_vars(yaml);

    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;

    config.checkpoint.dir = expand_tilde(&config.checkpoint.dir);

    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.remote.url.trim().is_empty() {
        errors.push("remote.url: must not be empty".to_string());
    } else if !config.remote.url.starts_with("http://") && !config.remote.url.starts_with("https://") {
        errors.push(format!(
            "remote.url: '{}' must start with http:// or https://",
            config.remote.url
        ));
    }
    if config.remote.resource.trim().is_empty() {
        errors.push("remote.resource: must not be empty".to_string());
    }

    let limiter = &config.limiter;
    if limiter.burst_quota == 0 {
        errors.push("limiter.burst_quota: must be at least 1".to_string());
    }
    if limiter.burst_window.is_zero() {
        errors.push("limiter.burst_window: must be greater than zero".to_string());
    }
    if limiter.jitter_min > limiter.jitter_max {
        errors.push("limiter.jitter_min: must not exceed limiter.jitter_max".to_string());
    }

    let dispatch = &config.dispatch;
    if dispatch.checkpoint_every == 0 {
        errors.push("dispatch.checkpoint_every: must be at least 1".to_string());
    }
    if dispatch.progress_every == 0 {
        errors.push("dispatch.progress_every: must be at least 1".to_string());
    }
    if dispatch.send_timeout.is_zero() {
        errors.push("dispatch.send_timeout: must be greater than zero".to_string());
    }

    if let Some(slot) = &config.checkpoint.slot {
        if !is_plain_slot(slot) {
            errors.push(format!(
                "checkpoint.slot: '{}' may only contain letters, digits, '-', '_' and '.', and must not start with '.'",
                slot
            ));
        } else if slot.ends_with(ARCHIVE_SUFFIX) {
            errors.push(format!(
                "checkpoint.slot: '{}' must not end with '{}'",
                slot, ARCHIVE_SUFFIX
            ));
        }
    }
    if config.checkpoint.expiry.is_zero() {
        errors.push("checkpoint.expiry: must be greater than zero".to_string());
    }

    if config.validation.region_size == 0 {
        errors.push("validation.region_size: must be at least 1".to_string());
    }
    if config.validation.read_concurrency == 0 {
        errors.push("validation.read_concurrency: must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("remote:\n  url: https://grid.example\n").unwrap();
        assert_eq!(config.remote.resource, "default");
        assert_eq!(config.remote.timeout, Duration::from_secs(8));
        assert_eq!(config.limiter.burst_quota, 15);
        assert_eq!(config.limiter.burst_window, Duration::from_secs(10));
        assert_eq!(config.dispatch.checkpoint_every, 10);
        assert_eq!(config.dispatch.progress_every, 50);
        assert_eq!(config.dispatch.failure_policy, FailurePolicy::Drop);
        assert_eq!(config.checkpoint.expiry, Duration::from_secs(86400));
    }

    #[test]
    fn test_durations_and_policy_parse() {
        let yaml = r#"
remote:
  url: https://grid.example
limiter:
  min_spacing: 250ms
  burst_quota: 4
  burst_window: 2s
dispatch:
  burst_cooldown: 30s
  failure_policy:
    requeue:
      max_retries: 2
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.limiter.min_spacing, Duration::from_millis(250));
        assert_eq!(config.limiter.burst_quota, 4);
        assert_eq!(config.dispatch.burst_cooldown, Duration::from_secs(30));
        assert_eq!(
            config.dispatch.failure_policy,
            FailurePolicy::Requeue { max_retries: 2 }
        );
        // untouched fields keep their defaults
        assert_eq!(config.limiter.jitter_max, Duration::from_millis(150));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let yaml = r#"
remote:
  url: ftp://grid.example
limiter:
  burst_quota: 0
  jitter_min: 200ms
  jitter_max: 100ms
"#;
        match parse_config(yaml) {
            Err(ConfigError::ValidationList(errors)) => {
                assert_eq!(errors.len(), 3);
                assert!(errors[0].contains("remote.url"));
            }
            other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_slot_names_that_would_be_rewritten_are_rejected() {
        for slot in ["a/b", "kiosk one", ".hidden", "host.completed"] {
            let yaml = format!(
                "remote:\n  url: https://grid.example\ncheckpoint:\n  slot: \"{}\"\n",
                slot
            );
            match parse_config(&yaml) {
                Err(ConfigError::ValidationList(errors)) => {
                    assert_eq!(errors.len(), 1);
                    assert!(errors[0].starts_with("checkpoint.slot"));
                }
                other => panic!("expected slot error for {}, got {:?}", slot, other.map(|_| ())),
            }
        }

        let yaml = "remote:\n  url: https://grid.example\ncheckpoint:\n  slot: kiosk-1\n";
        assert_eq!(parse_config(yaml).unwrap().checkpoint.slot.as_deref(), Some("kiosk-1"));
    }

    #[test]
    fn test_unset_env_var_is_reported() {
        let yaml = "remote:\n  url: https://grid.example\n  token: $env{GRIDCAST_TEST_UNSET_TOKEN}\n";
        match parse_config(yaml) {
            Err(ConfigError::Validation(msg)) => assert!(msg.contains("GRIDCAST_TEST_UNSET_TOKEN")),
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }
}
