use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

/// Runtime record binding a service descriptor to its running child process.
/// Owned exclusively by the service manager; at most one exists per service.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ActiveForward {
    pub service_id: Uuid,
    pub pid: u32,
    pub local_port: u16,
    pub remote_port: u16,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restart_count: u32,
}

impl ActiveForward {
    pub fn new(service_id: Uuid, pid: u32, local_port: u16, remote_port: u16) -> Self {
        Self {
            service_id,
            pid,
            local_port,
            remote_port,
            started_at: Utc::now(),
            last_health_check_at: None,
            restart_count: 0,
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        let elapsed = Utc::now() - self.started_at;
        (elapsed.num_milliseconds().max(0) as f64) / 1000.0
    }

    pub fn mark_health_checked(&mut self) {
        self.last_health_check_at = Some(Utc::now());
    }

    pub fn increment_restart_count(&mut self) {
        self.restart_count = self.restart_count.saturating_add(1);
    }
}
