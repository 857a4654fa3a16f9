use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{
    FuturesUnordered,
    StreamExt,
};
use localport_commons::models::forward_model::ActiveForward;
use localport_commons::models::response::{
    ServiceStatusInfo,
    ServiceStopResult,
};
use localport_commons::models::service_model::{
    ForwardingTechnology,
    ServiceDescriptor,
    ServiceStatus,
};
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::sync::Mutex;
use tokio::time::sleep;
use uuid::Uuid;

use crate::adapters::{
    default_adapters,
    TransportAdapter,
};
use crate::error::ForwardError;
use crate::network_utils::check_port_available;

/// Delay between stop and start during a restart, giving the old child time
/// to release its port.
const RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
struct ServiceRuntime {
    status: ServiceStatus,
    technology: ForwardingTechnology,
    last_error: Option<String>,
}

/// Owns the service lifecycle: the active-forwards map, per-service status,
/// and the adapter calls that move services between states.
///
/// Locking discipline: the maps are touched only for short in-memory
/// updates; adapter I/O always happens with the map locks released. A
/// per-service mutex serializes start/stop for the same service so parallel
/// batch operations cannot interleave on one forward.
pub struct ServiceManager {
    adapters: HashMap<ForwardingTechnology, Arc<dyn TransportAdapter>>,
    forwards: Mutex<HashMap<Uuid, ActiveForward>>,
    runtime: Mutex<HashMap<Uuid, ServiceRuntime>>,
    service_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self::with_adapters(default_adapters())
    }

    pub fn with_adapters(
        adapters: HashMap<ForwardingTechnology, Arc<dyn TransportAdapter>>,
    ) -> Self {
        Self {
            adapters,
            forwards: Mutex::new(HashMap::new()),
            runtime: Mutex::new(HashMap::new()),
            service_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn service_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.service_locks.lock().await;
        locks.entry(id).or_default().clone()
    }

    fn adapter_for(
        &self, technology: ForwardingTechnology,
    ) -> Result<Arc<dyn TransportAdapter>, ForwardError> {
        self.adapters
            .get(&technology)
            .cloned()
            .ok_or_else(|| ForwardError::UnknownTechnology(technology.to_string()))
    }

    async fn set_runtime(
        &self, service: &ServiceDescriptor, status: ServiceStatus, last_error: Option<String>,
    ) {
        let mut runtime = self.runtime.lock().await;
        runtime.insert(
            service.id,
            ServiceRuntime {
                status,
                technology: service.technology,
                last_error,
            },
        );
    }

    pub async fn status_of(&self, service_id: Uuid) -> ServiceStatus {
        self.runtime
            .lock()
            .await
            .get(&service_id)
            .map(|r| r.status)
            .unwrap_or(ServiceStatus::Stopped)
    }

    /// Starts a forward for the service. Returns the existing forward when
    /// its child is still alive; evicts stale records first otherwise.
    pub async fn start_service(
        &self, service: &ServiceDescriptor,
    ) -> Result<ActiveForward, ForwardError> {
        let lock = self.service_lock(service.id).await;
        let _guard = lock.lock().await;

        info!("Starting service '{}'", service.name);
        let adapter = self.adapter_for(service.technology)?;

        let existing = {
            let forwards = self.forwards.lock().await;
            forwards.get(&service.id).cloned()
        };

        if let Some(forward) = existing {
            if adapter.is_process_alive(forward.pid).await {
                info!(
                    "Service '{}' already running (pid {})",
                    service.name, forward.pid
                );
                return Ok(forward);
            }

            debug!(
                "Evicting stale forward for '{}' (dead pid {})",
                service.name, forward.pid
            );
            self.forwards.lock().await.remove(&service.id);
        }

        let port_taken_by_us = {
            let forwards = self.forwards.lock().await;
            forwards
                .values()
                .any(|f| f.service_id != service.id && f.local_port == service.local_port)
        };

        if port_taken_by_us || !check_port_available(service.local_port) {
            let err = ForwardError::PortUnavailable {
                port: service.local_port,
            };
            error!("service={} component=manager kind={} {err}", service.name, err.kind());
            self.set_runtime(service, ServiceStatus::Failed, Some(err.to_string()))
                .await;
            return Err(err);
        }

        self.set_runtime(service, ServiceStatus::Starting, None).await;

        match adapter
            .start_port_forward(service.local_port, service.remote_port, &service.connection_info)
            .await
        {
            Ok(pid) => {
                let forward =
                    ActiveForward::new(service.id, pid, service.local_port, service.remote_port);
                self.forwards.lock().await.insert(service.id, forward.clone());
                self.set_runtime(service, ServiceStatus::Running, None).await;

                info!(
                    "Service '{}' started (pid {pid}, 127.0.0.1:{} -> {})",
                    service.name, service.local_port, service.remote_port
                );
                Ok(forward)
            }
            Err(err) => {
                error!(
                    "service={} component=manager kind={} {err}",
                    service.name,
                    err.kind()
                );
                self.set_runtime(service, ServiceStatus::Failed, Some(err.to_string()))
                    .await;
                Err(err)
            }
        }
    }

    /// Stops the service's forward. Idempotent: a service with no active
    /// forward is simply marked stopped.
    pub async fn stop_service(&self, service: &ServiceDescriptor) -> Result<(), ForwardError> {
        let lock = self.service_lock(service.id).await;
        let _guard = lock.lock().await;

        info!("Stopping service '{}'", service.name);

        let forward = {
            let forwards = self.forwards.lock().await;
            forwards.get(&service.id).cloned()
        };

        let Some(forward) = forward else {
            debug!("No active forward for '{}', nothing to stop", service.name);
            self.set_runtime(service, ServiceStatus::Stopped, None).await;
            return Ok(());
        };

        let adapter = self.adapter_for(service.technology)?;
        if let Err(err) = adapter.stop_port_forward(forward.pid).await {
            error!(
                "service={} component=manager kind={} {err}",
                service.name,
                err.kind()
            );
            self.set_runtime(service, ServiceStatus::Failed, Some(err.to_string()))
                .await;
            return Err(err);
        }

        self.forwards.lock().await.remove(&service.id);
        self.set_runtime(service, ServiceStatus::Stopped, None).await;
        info!("Service '{}' stopped (pid {})", service.name, forward.pid);
        Ok(())
    }

    /// stop → short delay → start. The restart count survives through the
    /// new forward record.
    pub async fn restart_service(
        &self, service: &ServiceDescriptor,
    ) -> Result<ActiveForward, ForwardError> {
        info!("Restarting service '{}'", service.name);

        let previous_restarts = {
            let forwards = self.forwards.lock().await;
            forwards
                .get(&service.id)
                .map(|f| f.restart_count)
                .unwrap_or(0)
        };

        self.set_runtime(service, ServiceStatus::Restarting, None).await;
        self.stop_service(service).await?;
        sleep(RESTART_DELAY).await;
        let mut forward = self.start_service(service).await?;

        {
            let mut forwards = self.forwards.lock().await;
            if let Some(stored) = forwards.get_mut(&service.id) {
                // The fresh record starts at zero; carry the old streak over
                // before counting this restart.
                stored.restart_count = previous_restarts;
                stored.increment_restart_count();
                forward = stored.clone();
            }
        }

        info!(
            "Service '{}' restarted (restart #{})",
            service.name, forward.restart_count
        );
        Ok(forward)
    }

    pub async fn is_service_running(&self, service: &ServiceDescriptor) -> bool {
        let forward = {
            let forwards = self.forwards.lock().await;
            forwards.get(&service.id).cloned()
        };
        let Some(forward) = forward else {
            return false;
        };
        let Ok(adapter) = self.adapter_for(service.technology) else {
            return false;
        };
        adapter.is_process_alive(forward.pid).await
    }

    /// Status snapshot for one service. A RUNNING record whose child died is
    /// eagerly demoted to FAILED here.
    pub async fn get_service_status(&self, service: &ServiceDescriptor) -> ServiceStatusInfo {
        let forward = {
            let forwards = self.forwards.lock().await;
            forwards.get(&service.id).cloned()
        };

        let (status, last_error) = {
            let runtime = self.runtime.lock().await;
            runtime
                .get(&service.id)
                .map(|r| (r.status, r.last_error.clone()))
                .unwrap_or((ServiceStatus::Stopped, None))
        };

        let mut info = ServiceStatusInfo {
            id: service.id,
            name: service.name.clone(),
            technology: service.technology,
            local_port: service.local_port,
            remote_port: service.remote_port,
            status,
            pid: None,
            started_at: None,
            last_health_check_at: None,
            restart_count: 0,
            uptime_seconds: None,
            is_healthy: false,
            tags: service.tags.clone(),
            description: service.description.clone(),
            last_error,
        };

        if let Some(forward) = forward {
            info.pid = Some(forward.pid);
            info.started_at = Some(forward.started_at);
            info.last_health_check_at = forward.last_health_check_at;
            info.restart_count = forward.restart_count;
            info.uptime_seconds = Some(forward.uptime_seconds());

            let alive = match self.adapter_for(service.technology) {
                Ok(adapter) => adapter.is_process_alive(forward.pid).await,
                Err(_) => false,
            };

            if alive {
                info.is_healthy = true;
            } else if status == ServiceStatus::Running {
                warn!(
                    "Service '{}' has a dead child (pid {}), marking failed",
                    service.name, forward.pid
                );
                self.set_runtime(
                    service,
                    ServiceStatus::Failed,
                    Some("forwarder process died".to_string()),
                )
                .await;
                info.status = ServiceStatus::Failed;
            }
        }

        info
    }

    pub async fn get_all_service_status(
        &self, services: &[ServiceDescriptor],
    ) -> Vec<ServiceStatusInfo> {
        let mut statuses = Vec::with_capacity(services.len());
        for service in services {
            statuses.push(self.get_service_status(service).await);
        }
        statuses
    }

    /// Stamps the forward's last health check time; called by the monitor
    /// after every probe.
    pub async fn record_health_check(&self, service_id: Uuid) {
        let mut forwards = self.forwards.lock().await;
        if let Some(forward) = forwards.get_mut(&service_id) {
            forward.mark_health_checked();
        }
    }

    pub async fn active_forward(&self, service_id: Uuid) -> Option<ActiveForward> {
        self.forwards.lock().await.get(&service_id).cloned()
    }

    pub async fn active_forwards(&self) -> Vec<ActiveForward> {
        self.forwards.lock().await.values().cloned().collect()
    }

    pub async fn active_forwards_count(&self) -> usize {
        self.forwards.lock().await.len()
    }

    /// Marks a service failed without touching its forward; used by the
    /// restart controller when the restart budget runs out.
    pub async fn mark_failed(&self, service: &ServiceDescriptor, reason: impl Into<String>) {
        self.set_runtime(service, ServiceStatus::Failed, Some(reason.into()))
            .await;
    }

    /// Sweeps the active set and drops every entry whose child is gone.
    /// Returns how many records were removed.
    pub async fn cleanup_dead_processes(&self) -> usize {
        let snapshot: Vec<(Uuid, u32, ForwardingTechnology)> = {
            let forwards = self.forwards.lock().await;
            let runtime = self.runtime.lock().await;
            forwards
                .values()
                .filter_map(|f| {
                    runtime
                        .get(&f.service_id)
                        .map(|r| (f.service_id, f.pid, r.technology))
                })
                .collect()
        };

        let mut dead = Vec::new();
        for (service_id, pid, technology) in snapshot {
            let alive = match self.adapter_for(technology) {
                Ok(adapter) => adapter.is_process_alive(pid).await,
                Err(_) => false,
            };
            if !alive {
                info!("Found dead forward (service {service_id}, pid {pid})");
                dead.push(service_id);
            }
        }

        let removed = {
            let mut forwards = self.forwards.lock().await;
            let mut runtime = self.runtime.lock().await;
            let mut removed = 0;
            for service_id in &dead {
                if forwards.remove(service_id).is_some() {
                    removed += 1;
                }
                if let Some(entry) = runtime.get_mut(service_id) {
                    entry.status = ServiceStatus::Failed;
                    entry.last_error = Some("forwarder process died".to_string());
                }
            }
            removed
        };

        if removed > 0 {
            info!("Cleaned up {removed} dead forward(s)");
        }
        removed
    }

    /// Stops every service in the batch concurrently; individual failures
    /// are collected, never raised.
    pub async fn stop_all_services(&self, services: &[ServiceDescriptor]) -> Vec<ServiceStopResult> {
        let mut tasks: FuturesUnordered<_> = services
            .iter()
            .map(|service| async move {
                match self.stop_service(service).await {
                    Ok(()) => ServiceStopResult::ok(service.name.clone()),
                    Err(err) => ServiceStopResult::err(service.name.clone(), err.to_string()),
                }
            })
            .collect();

        let mut results = Vec::with_capacity(services.len());
        while let Some(result) = tasks.next().await {
            results.push(result);
        }
        results
    }

    /// Final teardown: every adapter reaps everything it ever spawned,
    /// regardless of what the forwards map remembers.
    pub async fn cleanup_all_processes(&self) {
        for (technology, adapter) in &self.adapters {
            if let Err(err) = adapter.cleanup_all_processes().await {
                error!("Error cleaning up {technology} processes: {err}");
            }
        }

        let mut forwards = self.forwards.lock().await;
        let count = forwards.len();
        forwards.clear();

        let mut runtime = self.runtime.lock().await;
        for entry in runtime.values_mut() {
            entry.status = ServiceStatus::Stopped;
        }

        if count > 0 {
            info!("Cleared {count} forward record(s) during cleanup");
        }
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::collections::HashSet;
    use std::net::TcpListener;
    use std::sync::atomic::{
        AtomicBool,
        AtomicU32,
        Ordering,
    };

    use async_trait::async_trait;
    use localport_commons::models::service_model::ForwardingTechnology;

    use super::*;

    /// In-memory stand-in for a real transport: hands out fake PIDs and
    /// tracks which of them are "alive".
    struct StubAdapter {
        technology: ForwardingTechnology,
        next_pid: AtomicU32,
        alive: std::sync::Mutex<HashSet<u32>>,
        fail_start: AtomicBool,
    }

    impl StubAdapter {
        fn new(technology: ForwardingTechnology) -> Self {
            Self {
                technology,
                next_pid: AtomicU32::new(1000),
                alive: std::sync::Mutex::new(HashSet::new()),
                fail_start: AtomicBool::new(false),
            }
        }

        fn kill(&self, pid: u32) {
            self.alive.lock().unwrap().remove(&pid);
        }

        fn set_fail_start(&self, fail: bool) {
            self.fail_start.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TransportAdapter for StubAdapter {
        fn technology(&self) -> ForwardingTechnology {
            self.technology
        }

        async fn start_port_forward(
            &self, _local_port: u16, _remote_port: u16,
            _connection_info: &BTreeMap<String, String>,
        ) -> Result<u32, ForwardError> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(ForwardError::AdapterTransport {
                    technology: "stub",
                    message: "remote unreachable".to_string(),
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

    fn stub_manager() -> (Arc<ServiceManager>, Arc<StubAdapter>) {
        let adapter = Arc::new(StubAdapter::new(ForwardingTechnology::Ssh));
        let mut adapters: HashMap<ForwardingTechnology, Arc<dyn TransportAdapter>> = HashMap::new();
        adapters.insert(ForwardingTechnology::Ssh, adapter.clone());
        (Arc::new(ServiceManager::with_adapters(adapters)), adapter)
    }

    fn descriptor(name: &str, port: u16) -> ServiceDescriptor {
        ServiceDescriptor::new(name, ForwardingTechnology::Ssh, port, port)
    }

    fn free_port() -> u16 {
        portpicker::pick_unused_port().expect("no free port")
    }

    #[tokio::test]
    async fn test_start_creates_single_forward() {
        let (manager, _adapter) = stub_manager();
        let service = descriptor("pg", free_port());

        let forward = manager.start_service(&service).await.unwrap();
        assert_eq!(forward.service_id, service.id);
        assert_eq!(manager.active_forwards_count().await, 1);
        assert_eq!(manager.status_of(service.id).await, ServiceStatus::Running);
    }

    #[tokio::test]
    async fn test_double_start_returns_existing_pid() {
        let (manager, _adapter) = stub_manager();
        let service = descriptor("pg", free_port());

        let first = manager.start_service(&service).await.unwrap();
        let second = manager.start_service(&service).await.unwrap();

        assert_eq!(first.pid, second.pid);
        assert_eq!(manager.active_forwards_count().await, 1);
    }

    #[tokio::test]
    async fn test_start_evicts_stale_forward_and_respawns() {
        let (manager, adapter) = stub_manager();
        let service = descriptor("pg", free_port());

        let first = manager.start_service(&service).await.unwrap();
        adapter.kill(first.pid);

        let second = manager.start_service(&service).await.unwrap();
        assert_ne!(first.pid, second.pid);
        assert_eq!(manager.active_forwards_count().await, 1);
    }

    #[tokio::test]
    async fn test_port_in_use_fails_without_forward() {
        let (manager, _adapter) = stub_manager();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let service = descriptor("pg", port);

        let err = manager.start_service(&service).await.unwrap_err();
        assert!(matches!(err, ForwardError::PortUnavailable { .. }));
        assert_eq!(manager.active_forwards_count().await, 0);
        assert_eq!(manager.status_of(service.id).await, ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn test_second_service_on_same_port_is_refused() {
        let (manager, _adapter) = stub_manager();
        let port = free_port();
        let first = descriptor("first", port);
        let second = descriptor("second", port);

        manager.start_service(&first).await.unwrap();
        let err = manager.start_service(&second).await.unwrap_err();

        assert!(matches!(err, ForwardError::PortUnavailable { .. }));
        assert_eq!(manager.status_of(second.id).await, ServiceStatus::Failed);
        assert_eq!(manager.active_forwards_count().await, 1);
    }

    #[tokio::test]
    async fn test_adapter_failure_marks_failed_without_forward() {
        let (manager, adapter) = stub_manager();
        adapter.set_fail_start(true);
        let service = descriptor("pg", free_port());

        let err = manager.start_service(&service).await.unwrap_err();
        assert!(matches!(err, ForwardError::AdapterTransport { .. }));
        assert_eq!(manager.active_forwards_count().await, 0);
        assert_eq!(manager.status_of(service.id).await, ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (manager, _adapter) = stub_manager();
        let service = descriptor("pg", free_port());

        manager.start_service(&service).await.unwrap();
        manager.stop_service(&service).await.unwrap();
        manager.stop_service(&service).await.unwrap();

        assert_eq!(manager.status_of(service.id).await, ServiceStatus::Stopped);
        assert_eq!(manager.active_forwards_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_increments_count() {
        let (manager, _adapter) = stub_manager();
        let service = descriptor("pg", free_port());

        manager.start_service(&service).await.unwrap();
        let restarted = manager.restart_service(&service).await.unwrap();
        assert_eq!(restarted.restart_count, 1);

        let again = manager.restart_service(&service).await.unwrap();
        assert_eq!(again.restart_count, 2);
    }

    #[tokio::test]
    async fn test_dead_pid_demotes_status_to_failed() {
        let (manager, adapter) = stub_manager();
        let service = descriptor("pg", free_port());

        let forward = manager.start_service(&service).await.unwrap();
        adapter.kill(forward.pid);

        let info = manager.get_service_status(&service).await;
        assert_eq!(info.status, ServiceStatus::Failed);
        assert!(!info.is_healthy);
        assert_eq!(manager.status_of(service.id).await, ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn test_cleanup_dead_processes_counts_removals() {
        let (manager, adapter) = stub_manager();
        let first = descriptor("a", free_port());
        let second = descriptor("b", free_port());

        let forward = manager.start_service(&first).await.unwrap();
        manager.start_service(&second).await.unwrap();

        adapter.kill(forward.pid);
        let removed = manager.cleanup_dead_processes().await;

        assert_eq!(removed, 1);
        assert_eq!(manager.active_forwards_count().await, 1);
        assert_eq!(manager.status_of(first.id).await, ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn test_stop_all_collects_results() {
        let (manager, _adapter) = stub_manager();
        let services = vec![descriptor("a", free_port()), descriptor("b", free_port())];

        for service in &services {
            manager.start_service(service).await.unwrap();
        }

        let results = manager.stop_all_services(&services).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(manager.active_forwards_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_all_clears_every_forward() {
        let (manager, adapter) = stub_manager();
        let services = vec![descriptor("a", free_port()), descriptor("b", free_port())];
        for service in &services {
            manager.start_service(service).await.unwrap();
        }

        manager.cleanup_all_processes().await;

        assert_eq!(manager.active_forwards_count().await, 0);
        assert!(adapter.alive.lock().unwrap().is_empty());
    }
}
