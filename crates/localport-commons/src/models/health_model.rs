use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

/// Per-service probe bookkeeping. The two-threshold counters smooth
/// transient flaps: one bad probe never flips a healthy service unless the
/// failure threshold is 1, and a recovering service must string together
/// `success_threshold` good probes before it counts as healthy again.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HealthState {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub is_healthy: bool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check_at: None,
            last_success_at: None,
            last_error: None,
            is_healthy: true,
        }
    }
}

impl HealthState {
    /// Records a probe success. Returns true when this observation crossed
    /// the success threshold and flipped the service back to healthy.
    pub fn record_success(&mut self, success_threshold: u32) -> bool {
        let now = Utc::now();
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
        self.last_check_at = Some(now);
        self.last_success_at = Some(now);
        self.last_error = None;

        if !self.is_healthy && self.consecutive_successes >= success_threshold {
            self.is_healthy = true;
            return true;
        }
        false
    }

    /// Records a probe failure. Returns true when this observation crossed
    /// the failure threshold and flipped the service to unhealthy.
    pub fn record_failure(&mut self, failure_threshold: u32, error: Option<String>) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
        self.last_check_at = Some(Utc::now());
        self.last_error = error;

        if self.is_healthy && self.consecutive_failures >= failure_threshold {
            self.is_healthy = false;
            return true;
        }
        false
    }
}

/// Emitted by the health monitor when a service crosses a threshold.
#[derive(Clone, Debug)]
pub struct HealthTransition {
    pub service_id: Uuid,
    pub service_name: String,
    pub became_unhealthy: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}
