use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;

use crate::models::service_model::{
    ForwardingTechnology,
    HealthCheckConfig,
    RestartPolicy,
    ServiceDescriptor,
};
use crate::utils::config_dir::resolve_config_path;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "no configuration file found (searched ./localport.yaml, \
         ~/.config/localport/config.yaml, /etc/localport/config.yaml)"
    )]
    NotFound,

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Optional top-level templates applied to services that omit the
/// corresponding section.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ConfigDefaults {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckConfig>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConfigDocument {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<ConfigDefaults>,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

/// Loads, defaults-expands and validates the configuration. `explicit`
/// overrides `LOCALPORT_CONFIG` and the search order.
pub fn load_config(explicit: Option<&PathBuf>) -> Result<Vec<ServiceDescriptor>, ConfigError> {
    let path = resolve_config_path(explicit).ok_or(ConfigError::NotFound)?;

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;

    parse_config(&raw).map_err(|err| match err {
        ConfigError::Yaml(source) => ConfigError::Parse { path, source },
        other => other,
    })
}

/// Parses a config document from a string, applies `defaults` and runs
/// validation. Returns the final descriptor set.
pub fn parse_config(raw: &str) -> Result<Vec<ServiceDescriptor>, ConfigError> {
    let document: ConfigDocument = serde_yaml::from_str(raw)?;

    let defaults = document.defaults.unwrap_or_default();
    let mut services = document.services;
    for service in &mut services {
        if service.health_check.is_none() {
            service.health_check = defaults.health_check.clone();
        }
        if service.restart_policy.is_none() {
            service.restart_policy = defaults.restart_policy.clone();
        }
    }

    validate_descriptors(&services)?;
    Ok(services)
}

/// Serializes descriptors back to a YAML document, the inverse of
/// `parse_config` minus the defaults section.
pub fn export_config(services: &[ServiceDescriptor]) -> Result<String, ConfigError> {
    let document = ConfigDocument {
        version: Some("1".to_string()),
        defaults: None,
        services: services.to_vec(),
    };
    Ok(serde_yaml::to_string(&document)?)
}

pub fn validate_descriptors(services: &[ServiceDescriptor]) -> Result<(), ConfigError> {
    let mut errors = Vec::new();
    let mut seen_names: HashSet<&str> = HashSet::new();

    for service in services {
        let name = if service.name.is_empty() {
            errors.push("service with empty name".to_string());
            "<unnamed>"
        } else {
            service.name.as_str()
        };

        if !service.name.is_empty() && !seen_names.insert(service.name.as_str()) {
            errors.push(format!("service '{name}': duplicate name"));
        }

        if service.local_port == 0 {
            errors.push(format!("service '{name}': local_port must be in 1..=65535"));
        }
        if service.remote_port == 0 {
            errors.push(format!(
                "service '{name}': remote_port must be in 1..=65535"
            ));
        }

        match service.technology {
            ForwardingTechnology::Kubectl => {
                if !service.connection_info.contains_key("resource_name") {
                    errors.push(format!(
                        "service '{name}': kubectl connection_info requires 'resource_name'"
                    ));
                }
            }
            ForwardingTechnology::Ssh => {
                if !service.connection_info.contains_key("host") {
                    errors.push(format!(
                        "service '{name}': ssh connection_info requires 'host'"
                    ));
                }
            }
        }

        if let Some(check) = &service.health_check {
            if check.interval_seconds < 1 {
                errors.push(format!(
                    "service '{name}': health_check interval_seconds must be >= 1"
                ));
            }
            if check.timeout_seconds <= 0.0 {
                errors.push(format!(
                    "service '{name}': health_check timeout_seconds must be > 0"
                ));
            }
            if check.failure_threshold < 1 {
                errors.push(format!(
                    "service '{name}': health_check failure_threshold must be >= 1"
                ));
            }
            if check.success_threshold < 1 {
                errors.push(format!(
                    "service '{name}': health_check success_threshold must be >= 1"
                ));
            }
        }

        if let Some(policy) = &service.restart_policy {
            if policy.backoff_multiplier < 1.0 {
                errors.push(format!(
                    "service '{name}': restart_policy backoff_multiplier must be >= 1.0"
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(errors))
    }
}
