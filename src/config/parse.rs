use super::types::{Config, MonitorConfig};
use crate::config::{expand_env_vars, expand_tilde};
use regex::Regex;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let yaml_string = expand_env_vars(&yaml_string);
    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn expand_paths(config: &mut Config) {
    config.data_dir = expand_tilde(&config.data_dir);
    for monitor in &mut config.monitors {
        if let MonitorConfig::File(c) = monitor {
            c.folder = expand_tilde(&c.folder);
        }
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    for (i, monitor) in config.monitors.iter().enumerate() {
        let prefix = format!("monitors[{}]", i);

        if monitor.app_name().trim().is_empty() {
            errors.push(format!("{}: app_name cannot be empty", prefix));
        }
        if monitor.service_name().trim().is_empty() {
            errors.push(format!("{}: service_name cannot be empty", prefix));
        }
        if monitor.poll_interval().is_zero() {
            errors.push(format!("{}: poll_interval must be greater than zero", prefix));
        }

        if let Some(extractor) = monitor.extractor() {
            for (field, pattern) in [
                ("timestamp_regex", &extractor.timestamp_regex),
                ("log_level_regex", &extractor.log_level_regex),
            ] {
                if let Some(pattern) = pattern {
                    if let Err(e) = Regex::new(pattern) {
                        errors.push(format!("{}: invalid {}: {}", prefix, field, e));
                    }
                }
            }
        }

        match monitor {
            MonitorConfig::File(c) => {
                if c.folder.as_os_str().is_empty() {
                    errors.push(format!("{}: folder cannot be empty", prefix));
                }
            }
            MonitorConfig::DockerApi(c) => {
                if c.container_name.trim().is_empty() {
                    errors.push(format!("{}: container_name cannot be empty", prefix));
                }
                if c.proxy_host.trim().is_empty() {
                    errors.push(format!("{}: proxy_host cannot be empty", prefix));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
