use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use localport_commons::models::health_model::HealthTransition;
use localport_commons::models::service_model::{
    RestartPolicy,
    ServiceDescriptor,
    ServiceStatus,
};
use localport_forward::{
    ServiceManager,
    ServiceRegistry,
};
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Default)]
struct EpisodeState {
    attempts: u32,
    unhealthy: bool,
    in_flight: bool,
    exhausted: bool,
}

struct ControllerState {
    manager: Arc<ServiceManager>,
    registry: Arc<ServiceRegistry>,
    episodes: Mutex<HashMap<Uuid, EpisodeState>>,
    cancel: CancellationToken,
}

/// Consumes became-unhealthy transitions and schedules restarts with
/// exponential backoff. One restart episode runs per service at a time;
/// duplicate events while an episode is in flight coalesce into it. A
/// became-healthy transition ends the episode and resets the budget.
#[derive(Clone)]
pub struct RestartController {
    state: Arc<ControllerState>,
}

impl RestartController {
    pub fn new(manager: Arc<ServiceManager>, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            state: Arc::new(ControllerState {
                manager,
                registry,
                episodes: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Spawns the event loop; it ends when the transition channel closes or
    /// `shutdown` is called.
    pub fn run(&self, mut transitions: tokio::sync::mpsc::Receiver<HealthTransition>) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = controller.state.cancel.cancelled() => break,
                    transition = transitions.recv() => {
                        let Some(transition) = transition else { break };
                        controller.handle_transition(transition).await;
                    }
                }
            }
            debug!("Restart controller finished");
        })
    }

    pub fn shutdown(&self) {
        self.state.cancel.cancel();
    }

    /// Clears the failure episode for a service, e.g. after a manual start.
    pub async fn reset(&self, service_id: Uuid) {
        self.state.episodes.lock().await.remove(&service_id);
    }

    async fn handle_transition(&self, transition: HealthTransition) {
        if !transition.became_unhealthy {
            let mut episodes = self.state.episodes.lock().await;
            let episode = episodes.entry(transition.service_id).or_default();
            episode.unhealthy = false;
            episode.attempts = 0;
            episode.exhausted = false;
            return;
        }

        let service = match self.state.registry.get(transition.service_id).await {
            Some(service) => service,
            None => {
                warn!(
                    "Unhealthy transition for unknown service '{}', ignoring",
                    transition.service_name
                );
                return;
            }
        };

        {
            let mut episodes = self.state.episodes.lock().await;
            let episode = episodes.entry(service.id).or_default();
            episode.unhealthy = true;

            if episode.exhausted {
                debug!(
                    "Service '{}' restart budget already exhausted, ignoring",
                    service.name
                );
                return;
            }
            if episode.in_flight {
                debug!(
                    "Restart episode for '{}' already in flight, coalescing",
                    service.name
                );
                return;
            }
            episode.in_flight = true;
        }

        let status = self.state.manager.status_of(service.id).await;
        if status != ServiceStatus::Running && status != ServiceStatus::Failed {
            debug!(
                "Service '{}' is {status}, not eligible for automatic restart",
                service.name
            );
            self.state
                .episodes
                .lock()
                .await
                .entry(service.id)
                .or_default()
                .in_flight = false;
            return;
        }

        let controller = self.clone();
        tokio::spawn(async move {
            controller.run_episode(service).await;
        });
    }

    async fn run_episode(&self, service: ServiceDescriptor) {
        let policy = service.restart_policy.clone().unwrap_or_default();

        loop {
            let attempt = {
                let episodes = self.state.episodes.lock().await;
                episodes.get(&service.id).map(|e| e.attempts).unwrap_or(0)
            };

            if attempt >= policy.max_restarts {
                error!(
                    "service={} component=restart kind=restart_exhausted budget of {} restart(s) spent",
                    service.name, policy.max_restarts
                );
                self.state
                    .manager
                    .mark_failed(
                        &service,
                        format!("restart budget exhausted after {attempt} attempt(s)"),
                    )
                    .await;
                let mut episodes = self.state.episodes.lock().await;
                if let Some(episode) = episodes.get_mut(&service.id) {
                    episode.exhausted = true;
                }
                break;
            }

            let delay = backoff_delay(&policy, attempt);
            info!(
                "Scheduling restart #{} of '{}' in {:.1}s",
                attempt + 1,
                service.name,
                delay.as_secs_f64()
            );

            tokio::select! {
                _ = self.state.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }

            {
                let episodes = self.state.episodes.lock().await;
                let recovered = episodes
                    .get(&service.id)
                    .map(|e| !e.unhealthy)
                    .unwrap_or(true);
                if recovered {
                    info!(
                        "Service '{}' recovered before restart, episode over",
                        service.name
                    );
                    break;
                }
            }

            let status = self.state.manager.status_of(service.id).await;
            if status != ServiceStatus::Running && status != ServiceStatus::Failed {
                debug!(
                    "Service '{}' is {status}, aborting restart episode",
                    service.name
                );
                break;
            }

            {
                let mut episodes = self.state.episodes.lock().await;
                if let Some(episode) = episodes.get_mut(&service.id) {
                    episode.attempts = episode.attempts.saturating_add(1);
                }
            }

            match self.state.manager.restart_service(&service).await {
                Ok(forward) => {
                    info!(
                        "Automatic restart of '{}' succeeded (restart_count {})",
                        service.name, forward.restart_count
                    );
                }
                Err(e) => {
                    error!(
                        "service={} component=restart kind={} automatic restart failed: {e}",
                        service.name,
                        e.kind()
                    );
                }
            }
        }

        let mut episodes = self.state.episodes.lock().await;
        if let Some(episode) = episodes.get_mut(&service.id) {
            episode.in_flight = false;
        }
    }
}

fn backoff_delay(policy: &RestartPolicy, attempt: u32) -> Duration {
    let factor = policy.backoff_multiplier.max(1.0).powi(attempt as i32);
    let seconds =
        (policy.backoff_initial_seconds as f64 * factor).min(policy.backoff_max_seconds as f64);
    Duration::from_secs_f64(seconds)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{
        AtomicBool,
        AtomicU32,
        Ordering,
    };

    use async_trait::async_trait;
    use localport_commons::models::service_model::ForwardingTechnology;
    use localport_forward::adapters::TransportAdapter;
    use localport_forward::ForwardError;
    use tokio::sync::mpsc;

    use super::*;

    struct CountingAdapter {
        next_pid: AtomicU32,
        start_calls: AtomicU32,
        fail_start: AtomicBool,
        alive: std::sync::Mutex<std::collections::HashSet<u32>>,
    }

    impl CountingAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next_pid: AtomicU32::new(5000),
                start_calls: AtomicU32::new(0),
                fail_start: AtomicBool::new(false),
                alive: std::sync::Mutex::new(std::collections::HashSet::new()),
            })
        }
    }

    #[async_trait]
    impl TransportAdapter for CountingAdapter {
        fn technology(&self) -> ForwardingTechnology {
            ForwardingTechnology::Ssh
        }

        async fn start_port_forward(
            &self, _local_port: u16, _remote_port: u16,
            _connection_info: &BTreeMap<String, String>,
        ) -> Result<u32, ForwardError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(ForwardError::AdapterTransport {
                    technology: "stub",
                    message: "permanently broken".to_string(),
                });
            }
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            self.alive.lock().unwrap().insert(pid);
            Ok(pid)
        }

        async fn stop_port_forward(&self, pid: u32) -> Result<(), ForwardError> {
            self.alive.lock().unwrap().remove(&pid);
            Ok(())
        }

        async fn is_process_alive(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }

        async fn cleanup_all_processes(&self) -> Result<(), ForwardError> {
            self.alive.lock().unwrap().clear();
            Ok(())
        }
    }

    fn service_with_policy(max_restarts: u32) -> ServiceDescriptor {
        let port = portpicker::pick_unused_port().unwrap();
        let mut service = ServiceDescriptor::new("svc", ForwardingTechnology::Ssh, port, 80);
        service.restart_policy = Some(RestartPolicy {
            max_restarts,
            backoff_initial_seconds: 1,
            backoff_multiplier: 2.0,
            backoff_max_seconds: 60,
        });
        service
    }

    async fn harness(
        service: &ServiceDescriptor,
    ) -> (
        RestartController,
        Arc<ServiceManager>,
        Arc<CountingAdapter>,
        mpsc::Sender<HealthTransition>,
        JoinHandle<()>,
    ) {
        let adapter = CountingAdapter::new();
        let mut adapters: HashMap<ForwardingTechnology, Arc<dyn TransportAdapter>> =
            HashMap::new();
        adapters.insert(ForwardingTechnology::Ssh, adapter.clone());
        let manager = Arc::new(ServiceManager::with_adapters(adapters));

        let registry = Arc::new(ServiceRegistry::new());
        registry.insert(service.clone()).await.unwrap();

        let controller = RestartController::new(manager.clone(), registry);
        let (tx, rx) = mpsc::channel(16);
        let handle = controller.run(rx);
        (controller, manager, adapter, tx, handle)
    }

    fn unhealthy_event(service: &ServiceDescriptor) -> HealthTransition {
        HealthTransition {
            service_id: service.id,
            service_name: service.name.clone(),
            became_unhealthy: true,
            consecutive_failures: 3,
            last_error: Some("connection refused".to_string()),
        }
    }

    fn healthy_event(service: &ServiceDescriptor) -> HealthTransition {
        HealthTransition {
            service_id: service.id,
            service_name: service.name.clone(),
            became_unhealthy: false,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_backoff_series_monotone_and_capped() {
        let policy = RestartPolicy {
            max_restarts: 10,
            backoff_initial_seconds: 1,
            backoff_multiplier: 2.0,
            backoff_max_seconds: 5,
        };

        assert_eq!(backoff_delay(&policy, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&policy, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_secs(5));
        assert_eq!(backoff_delay(&policy, 8), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_stops_restarting() {
        let service = service_with_policy(2);
        let (_controller, manager, adapter, tx, _handle) = harness(&service).await;

        manager.start_service(&service).await.unwrap();
        assert_eq!(adapter.start_calls.load(Ordering::SeqCst), 1);

        // Forwarder breaks for good.
        adapter.fail_start.store(true, Ordering::SeqCst);
        tx.send(unhealthy_event(&service)).await.unwrap();

        // Enough virtual time for both backoff waits plus restart delays.
        sleep(Duration::from_secs(30)).await;

        // Initial start + exactly two automatic attempts.
        assert_eq!(adapter.start_calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.status_of(service.id).await, ServiceStatus::Failed);

        // Further unhealthy events are ignored once exhausted.
        tx.send(unhealthy_event(&service)).await.unwrap();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(adapter.start_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_ends_episode_and_resets_budget() {
        let service = service_with_policy(2);
        let (_controller, manager, adapter, tx, _handle) = harness(&service).await;

        manager.start_service(&service).await.unwrap();
        tx.send(unhealthy_event(&service)).await.unwrap();

        sleep(Duration::from_secs(5)).await;
        let after_first = adapter.start_calls.load(Ordering::SeqCst);
        assert!(after_first >= 2, "expected at least one restart attempt");

        // Monitor reports recovery; the episode ends and the budget resets.
        tx.send(healthy_event(&service)).await.unwrap();
        sleep(Duration::from_secs(120)).await;
        let settled = adapter.start_calls.load(Ordering::SeqCst);

        // A fresh unhealthy flip later starts a new episode from attempt 0.
        tx.send(unhealthy_event(&service)).await.unwrap();
        sleep(Duration::from_secs(10)).await;
        assert!(adapter.start_calls.load(Ordering::SeqCst) > settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_events_coalesce_into_one_episode() {
        let service = service_with_policy(5);
        let (_controller, manager, adapter, tx, _handle) = harness(&service).await;

        manager.start_service(&service).await.unwrap();

        tx.send(unhealthy_event(&service)).await.unwrap();
        tx.send(unhealthy_event(&service)).await.unwrap();
        tx.send(unhealthy_event(&service)).await.unwrap();

        // First backoff is 1s plus the 1s restart delay; only one episode
        // may fire in this window.
        sleep(Duration::from_secs(3)).await;
        assert_eq!(adapter.start_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_service_not_restarted() {
        let service = service_with_policy(5);
        let (_controller, manager, adapter, tx, _handle) = harness(&service).await;

        manager.start_service(&service).await.unwrap();
        manager.stop_service(&service).await.unwrap();

        tx.send(unhealthy_event(&service)).await.unwrap();
        sleep(Duration::from_secs(30)).await;

        // Only the initial start; a deliberately stopped service stays down.
        assert_eq!(adapter.start_calls.load(Ordering::SeqCst), 1);
    }
}
