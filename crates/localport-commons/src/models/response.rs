use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

use crate::models::service_model::{
    ForwardingTechnology,
    ServiceStatus,
};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceStartResult {
    pub service_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl ServiceStartResult {
    pub fn ok(service_name: impl Into<String>, pid: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            service_name: service_name.into(),
            success: true,
            pid: Some(pid),
            error: None,
            started_at: Some(started_at),
        }
    }

    pub fn err(service_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            success: false,
            pid: None,
            error: Some(error.into()),
            started_at: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceStopResult {
    pub service_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl ServiceStopResult {
    pub fn ok(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            success: true,
            error: None,
            stopped_at: Some(Utc::now()),
        }
    }

    pub fn err(service_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            success: false,
            error: Some(error.into()),
            stopped_at: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceStatusInfo {
    pub id: Uuid,
    pub name: String,
    pub technology: ForwardingTechnology,
    pub local_port: u16,
    pub remote_port: u16,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<f64>,
    #[serde(default)]
    pub is_healthy: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DaemonStatusInfo {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<f64>,
    pub managed_services: usize,
    pub active_forwards: usize,
    pub health_monitoring_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check_at: Option<DateTime<Utc>>,
}

impl DaemonStatusInfo {
    pub fn uptime_formatted(&self) -> String {
        let Some(uptime) = self.uptime_seconds else {
            return "n/a".to_string();
        };

        let total = uptime as u64;
        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let seconds = total % 60;

        if hours > 0 {
            format!("{hours}h {minutes}m {seconds}s")
        } else if minutes > 0 {
            format!("{minutes}m {seconds}s")
        } else {
            format!("{seconds}s")
        }
    }
}
