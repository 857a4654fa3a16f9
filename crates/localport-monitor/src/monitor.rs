use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{
    DateTime,
    Utc,
};
use localport_commons::models::health_model::{
    HealthState,
    HealthTransition,
};
use localport_commons::models::service_model::{
    HealthCheckConfig,
    ServiceDescriptor,
};
use localport_forward::ServiceManager;
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{
    sleep,
    timeout,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::probes::{
    build_probe,
    Probe,
    ProbeError,
};

/// Bound on waiting for probe tasks to wind down after cancellation.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

struct MonitorInner {
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Runs one probe loop per monitored service and keeps the per-service
/// hysteresis counters. Threshold crossings are emitted as transitions for
/// the restart controller. Probe tasks are independent; a slow probe for
/// one service never delays the others.
pub struct HealthMonitor {
    manager: Arc<ServiceManager>,
    transitions: mpsc::Sender<HealthTransition>,
    states: Arc<Mutex<HashMap<Uuid, HealthState>>>,
    inner: Mutex<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ServiceManager>, transitions: mpsc::Sender<HealthTransition>) -> Self {
        Self {
            manager,
            transitions,
            states: Arc::new(Mutex::new(HashMap::new())),
            inner: Mutex::new(MonitorInner {
                cancel: None,
                tasks: Vec::new(),
            }),
        }
    }

    /// Replaces the monitored set. Idempotent: the previous task set is
    /// cancelled and joined first. Services without a health_check section
    /// are skipped; a probe that fails to build skips only its service.
    pub async fn start_monitoring(&self, services: &[ServiceDescriptor]) {
        self.stop_monitoring().await;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        {
            // Drop counters for services that left the monitored set so a
            // removed-and-readded service starts a fresh episode.
            let monitored: Vec<Uuid> = services
                .iter()
                .filter(|s| s.health_check.is_some())
                .map(|s| s.id)
                .collect();
            let mut states = self.states.lock().await;
            states.retain(|id, _| monitored.contains(id));
        }

        for service in services {
            let Some(check) = service.health_check.clone() else {
                continue;
            };

            let probe = match build_probe(service) {
                Ok(probe) => probe,
                Err(e) => {
                    error!(
                        "service={} component=monitor kind=probe_config {e}",
                        service.name
                    );
                    continue;
                }
            };

            tasks.push(tokio::spawn(probe_loop(
                service.clone(),
                check,
                probe,
                self.states.clone(),
                self.manager.clone(),
                self.transitions.clone(),
                cancel.clone(),
            )));
        }

        if tasks.is_empty() {
            info!("No services configured for health monitoring");
            return;
        }

        info!("Health monitoring started for {} service(s)", tasks.len());
        let mut inner = self.inner.lock().await;
        inner.cancel = Some(cancel);
        inner.tasks = tasks;
    }

    /// Cancels every probe task and waits for them within a bounded join
    /// window. Safe to call when monitoring is not running.
    pub async fn stop_monitoring(&self) {
        let (cancel, tasks) = {
            let mut inner = self.inner.lock().await;
            (inner.cancel.take(), std::mem::take(&mut inner.tasks))
        };

        let Some(cancel) = cancel else {
            return;
        };

        cancel.cancel();

        let join_all = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if timeout(JOIN_TIMEOUT, join_all).await.is_err() {
            warn!(
                "Probe tasks did not finish within {}s join window",
                JOIN_TIMEOUT.as_secs()
            );
        }
        info!("Health monitoring stopped");
    }

    pub async fn is_monitoring(&self) -> bool {
        self.inner.lock().await.cancel.is_some()
    }

    pub async fn health_state(&self, service_id: Uuid) -> Option<HealthState> {
        self.states.lock().await.get(&service_id).cloned()
    }

    pub async fn all_health_states(&self) -> HashMap<Uuid, HealthState> {
        self.states.lock().await.clone()
    }

    /// Most recent probe time across all monitored services.
    pub async fn last_check_at(&self) -> Option<DateTime<Utc>> {
        self.states
            .lock()
            .await
            .values()
            .filter_map(|s| s.last_check_at)
            .max()
    }
}

#[allow(clippy::too_many_arguments)]
async fn probe_loop(
    service: ServiceDescriptor, check: HealthCheckConfig, probe: Box<dyn Probe>,
    states: Arc<Mutex<HashMap<Uuid, HealthState>>>, manager: Arc<ServiceManager>,
    transitions: mpsc::Sender<HealthTransition>, cancel: CancellationToken,
) {
    let interval = Duration::from_secs(check.interval_seconds);
    let limit = Duration::from_secs_f64(check.timeout_seconds);

    debug!(
        "Probe loop for '{}' ({}) every {}s",
        service.name,
        check.kind,
        check.interval_seconds
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }

        // Outer bound: the monitor never awaits a probe without a timeout,
        // whatever the implementation does internally.
        let outcome = match timeout(limit, probe.check(limit)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(limit)),
        };

        if cancel.is_cancelled() {
            break;
        }

        manager.record_health_check(service.id).await;

        let transition = {
            let mut states = states.lock().await;
            let state = states.entry(service.id).or_default();

            let crossed = match &outcome {
                Ok(latency) => {
                    debug!(
                        "service={} probe={} ok latency_ms={}",
                        service.name,
                        check.kind,
                        latency.as_millis()
                    );
                    state
                        .record_success(check.success_threshold)
                        .then_some(false)
                }
                Err(e) => {
                    debug!("service={} probe={} failed: {e}", service.name, check.kind);
                    state
                        .record_failure(check.failure_threshold, Some(e.to_string()))
                        .then_some(true)
                }
            };

            crossed.map(|became_unhealthy| HealthTransition {
                service_id: service.id,
                service_name: service.name.clone(),
                became_unhealthy,
                consecutive_failures: state.consecutive_failures,
                last_error: state.last_error.clone(),
            })
        };

        if let Some(transition) = transition {
            if transition.became_unhealthy {
                warn!(
                    "Service '{}' became unhealthy after {} consecutive failure(s)",
                    service.name, transition.consecutive_failures
                );
            } else {
                info!("Service '{}' became healthy", service.name);
            }
            if transitions.send(transition).await.is_err() {
                break;
            }
        }
    }

    debug!("Probe loop for '{}' finished", service.name);
}
