use std::collections::BTreeMap;
use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingTechnology {
    Kubectl,
    Ssh,
}

impl fmt::Display for ForwardingTechnology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardingTechnology::Kubectl => write!(f, "kubectl"),
            ForwardingTechnology::Ssh => write!(f, "ssh"),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    Failed,
    Restarting,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Starting => write!(f, "starting"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Failed => write!(f, "failed"),
            ServiceStatus::Restarting => write!(f, "restarting"),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    Tcp,
    #[serde(alias = "https")]
    Http,
    Kafka,
    #[serde(alias = "postgresql")]
    Postgres,
}

impl fmt::Display for HealthCheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthCheckKind::Tcp => write!(f, "tcp"),
            HealthCheckKind::Http => write!(f, "http"),
            HealthCheckKind::Kafka => write!(f, "kafka"),
            HealthCheckKind::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HealthCheckConfig {
    #[serde(rename = "type")]
    pub kind: HealthCheckKind,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default)]
    pub config: BTreeMap<String, serde_yaml::Value>,
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_timeout_seconds() -> f64 {
    5.0
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    1
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            kind: HealthCheckKind::Tcp,
            interval_seconds: default_interval_seconds(),
            timeout_seconds: default_timeout_seconds(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            config: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RestartPolicy {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_backoff_initial_seconds")]
    pub backoff_initial_seconds: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_backoff_max_seconds")]
    pub backoff_max_seconds: u64,
}

fn default_max_restarts() -> u32 {
    5
}

fn default_backoff_initial_seconds() -> u64 {
    1
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_max_seconds() -> u64 {
    60
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            backoff_initial_seconds: default_backoff_initial_seconds(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_seconds: default_backoff_max_seconds(),
        }
    }
}

/// Immutable description of one declared port forward. Identity is the `id`
/// UUID; `name` is also unique across a loaded configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ServiceDescriptor {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub technology: ForwardingTechnology,
    pub local_port: u16,
    pub remote_port: u16,
    #[serde(default)]
    pub connection_info: BTreeMap<String, String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckConfig>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServiceDescriptor {
    pub fn new(
        name: impl Into<String>, technology: ForwardingTechnology, local_port: u16,
        remote_port: u16,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            technology,
            local_port,
            remote_port,
            connection_info: BTreeMap::new(),
            health_check: None,
            restart_policy: None,
            tags: Vec::new(),
            description: None,
            enabled: true,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Two descriptors describe the same forward when everything except the
    /// generated id matches. Used by reload reconciliation.
    pub fn same_definition(&self, other: &ServiceDescriptor) -> bool {
        self.name == other.name
            && self.technology == other.technology
            && self.local_port == other.local_port
            && self.remote_port == other.remote_port
            && self.connection_info == other.connection_info
            && self.health_check == other.health_check
            && self.restart_policy == other.restart_policy
            && self.tags == other.tags
            && self.enabled == other.enabled
    }
}
