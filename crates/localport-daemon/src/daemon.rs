use std::path::PathBuf;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;
use std::time::Duration;

use chrono::{
    DateTime,
    Utc,
};
use futures::stream::{
    FuturesUnordered,
    StreamExt,
};
use localport_commons::models::health_model::HealthTransition;
use localport_commons::models::response::{
    DaemonStatusInfo,
    ServiceStartResult,
};
use localport_commons::utils::config::{
    load_config,
    ConfigError,
};
use localport_commons::utils::pid_file::{
    remove_pid_file,
    write_pid_file,
};
use localport_forward::{
    ServiceManager,
    ServiceRegistry,
};
use localport_monitor::{
    HealthMonitor,
    RestartController,
};
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::sync::{
    mpsc,
    Mutex,
};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::reconcile::diff_services;
use crate::signals::spawn_signal_task;
use crate::types::{
    ControlEvent,
    DaemonSettings,
};

struct DaemonState {
    settings: DaemonSettings,
    config_path: Option<PathBuf>,
    registry: Arc<ServiceRegistry>,
    manager: Arc<ServiceManager>,
    monitor: HealthMonitor,
    restart_controller: RestartController,
    transitions_rx: Mutex<Option<mpsc::Receiver<HealthTransition>>>,
    control_tx: mpsc::Sender<ControlEvent>,
    control_rx: Mutex<Option<mpsc::Receiver<ControlEvent>>>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    running: AtomicBool,
}

/// Ties the registry, service manager, health monitor and restart
/// controller together and owns the daemon's background tasks. Signals and
/// the in-process control API both funnel into one control task; every
/// long-running task observes the shutdown token. Cloning yields another
/// handle to the same daemon.
#[derive(Clone)]
pub struct DaemonRuntime {
    state: Arc<DaemonState>,
}

impl DaemonRuntime {
    pub fn new(config_path: Option<PathBuf>, settings: DaemonSettings) -> Self {
        Self::with_manager(config_path, settings, Arc::new(ServiceManager::new()))
    }

    /// Construction with an injected manager, used by tests to swap the
    /// transport adapters for stubs.
    pub fn with_manager(
        config_path: Option<PathBuf>, settings: DaemonSettings, manager: Arc<ServiceManager>,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::new());
        let (transition_tx, transition_rx) = mpsc::channel(64);
        let monitor = HealthMonitor::new(manager.clone(), transition_tx);
        let restart_controller = RestartController::new(manager.clone(), registry.clone());
        let (control_tx, control_rx) = mpsc::channel(8);

        Self {
            state: Arc::new(DaemonState {
                settings,
                config_path,
                registry,
                manager,
                monitor,
                restart_controller,
                transitions_rx: Mutex::new(Some(transition_rx)),
                control_tx,
                control_rx: Mutex::new(Some(control_rx)),
                shutdown: CancellationToken::new(),
                background: Mutex::new(Vec::new()),
                started_at: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.state.registry.clone()
    }

    pub fn manager(&self) -> Arc<ServiceManager> {
        self.state.manager.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// In-process shutdown trigger; the signal path lands on the same token.
    pub fn request_shutdown(&self) {
        self.state.shutdown.cancel();
    }

    /// Boot: signal handlers, configuration, parallel service start, health
    /// monitoring, background tasks. Per-service start failures are
    /// isolated; configuration or signal-install failures abort the boot.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.state.running.swap(true, Ordering::SeqCst) {
            warn!("Daemon is already running");
            return Ok(());
        }

        info!("Starting daemon");
        *self.state.started_at.lock().await = Some(Utc::now());

        let signal_task =
            match spawn_signal_task(self.state.control_tx.clone(), self.state.shutdown.clone()) {
                Ok(task) => task,
                Err(e) => {
                    self.state.running.store(false, Ordering::SeqCst);
                    return Err(anyhow::anyhow!("failed to install signal handlers: {e}"));
                }
            };
        self.state.background.lock().await.push(signal_task);

        if self.state.settings.write_pid_file {
            write_pid_file(std::process::id())?;
        }

        let services = match load_config(self.state.config_path.as_ref()) {
            Ok(services) => services,
            Err(e) => {
                error!("component=daemon kind=configuration {e}");
                self.stop(None).await;
                return Err(e.into());
            }
        };
        self.state.registry.replace_all(services).await;
        info!(
            "Configuration loaded ({} service(s))",
            self.state.registry.len().await
        );

        self.spawn_control_task().await;

        if self.state.settings.auto_start_services {
            let results = self.start_enabled_services().await;
            let failures = results.iter().filter(|r| !r.success).count();
            info!(
                "Auto-start finished ({} ok, {failures} failed)",
                results.len() - failures
            );
        }

        if self.state.settings.health_monitoring_enabled {
            let services = self.state.registry.find_all().await;
            self.state.monitor.start_monitoring(&services).await;

            if let Some(rx) = self.state.transitions_rx.lock().await.take() {
                let handle = self.state.restart_controller.run(rx);
                self.state.background.lock().await.push(handle);
            }
        }

        self.spawn_maintenance_task().await;

        info!("Daemon started");
        Ok(())
    }

    async fn spawn_control_task(&self) {
        let Some(mut rx) = self.state.control_rx.lock().await.take() else {
            return;
        };

        let runtime = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = runtime.state.shutdown.cancelled() => break,
                    event = rx.recv() => {
                        match event {
                            None => break,
                            Some(ControlEvent::Shutdown) => {
                                info!("Shutdown requested");
                                runtime.state.shutdown.cancel();
                            }
                            Some(ControlEvent::Reload) => {
                                if runtime.state.settings.config_reload_enabled {
                                    if let Err(e) = runtime.reload().await {
                                        error!("component=daemon kind=configuration reload failed: {e}");
                                    }
                                } else {
                                    warn!("Config reload is disabled, ignoring request");
                                }
                            }
                        }
                    }
                }
            }
            debug!("Control task finished");
        });
        self.state.background.lock().await.push(handle);
    }

    async fn spawn_maintenance_task(&self) {
        let runtime = self.clone();
        let interval = self.state.settings.maintenance_interval;

        let handle = tokio::spawn(async move {
            debug!("Maintenance loop started");
            loop {
                tokio::select! {
                    _ = runtime.state.shutdown.cancelled() => break,
                    _ = sleep(interval) => {}
                }

                let removed = runtime.state.manager.cleanup_dead_processes().await;
                if removed > 0 {
                    info!("Maintenance sweep removed {removed} dead forward(s)");
                }
            }
            debug!("Maintenance loop finished");
        });
        self.state.background.lock().await.push(handle);
    }

    /// Starts every enabled service in parallel. Failures are collected per
    /// service; one broken forward never aborts the batch.
    pub async fn start_enabled_services(&self) -> Vec<ServiceStartResult> {
        let services = self.state.registry.find_all().await;
        let enabled: Vec<_> = services.into_iter().filter(|s| s.enabled).collect();

        if enabled.is_empty() {
            info!("No enabled services to start");
            return Vec::new();
        }

        let manager = &self.state.manager;
        let mut tasks: FuturesUnordered<_> = enabled
            .iter()
            .map(|service| async move {
                match manager.start_service(service).await {
                    Ok(forward) => ServiceStartResult::ok(
                        service.name.clone(),
                        forward.pid,
                        forward.started_at,
                    ),
                    Err(e) => ServiceStartResult::err(service.name.clone(), e.to_string()),
                }
            })
            .collect();

        let mut results = Vec::new();
        while let Some(result) = tasks.next().await {
            results.push(result);
        }
        results
    }

    /// Blocks until a shutdown is requested, then tears the daemon down.
    pub async fn run_until_shutdown(&self) {
        info!("Daemon running, waiting for shutdown signal");
        self.state.shutdown.cancelled().await;
        self.stop(None).await;
    }

    /// Orderly teardown bounded by the graceful-shutdown window: stop
    /// monitoring, stop every service, reap adapter children, join
    /// background tasks. On overrun the remaining tasks are aborted and the
    /// daemon exits anyway.
    pub async fn stop(&self, timeout_override: Option<Duration>) {
        if !self.state.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping daemon");
        self.state.shutdown.cancel();

        let window = timeout_override.unwrap_or(self.state.settings.graceful_shutdown_timeout);
        let runtime = self.clone();
        let teardown = async move {
            runtime.state.monitor.stop_monitoring().await;
            runtime.state.restart_controller.shutdown();

            let services = runtime.state.registry.find_all().await;
            let results = runtime.state.manager.stop_all_services(&services).await;
            for result in results.iter().filter(|r| !r.success) {
                error!(
                    "service={} component=daemon stop failed: {}",
                    result.service_name,
                    result.error.as_deref().unwrap_or("unknown")
                );
            }

            runtime.state.manager.cleanup_all_processes().await;

            let handles: Vec<JoinHandle<()>> =
                std::mem::take(&mut *runtime.state.background.lock().await);
            for handle in handles {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(window, teardown).await.is_err() {
            error!(
                "component=daemon kind=shutdown_timeout graceful shutdown exceeded {}s, proceeding",
                window.as_secs()
            );
            for handle in std::mem::take(&mut *self.state.background.lock().await) {
                handle.abort();
            }
        }

        if self.state.settings.write_pid_file {
            if let Err(e) = remove_pid_file() {
                warn!("Failed to remove pid file: {e}");
            }
        }

        info!("Daemon stopped");
    }

    /// Reloads the configuration and reconciles the registry: additions are
    /// started, removals stopped, changed definitions restarted. A config
    /// that fails to load or validate leaves the previous state untouched.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        if !self.is_running() {
            warn!("Cannot reload configuration: daemon not running");
            return Ok(());
        }

        info!("Reloading configuration");
        let loaded = match load_config(self.state.config_path.as_ref()) {
            Ok(services) => services,
            Err(e) => {
                error!("Reload failed, keeping previous configuration: {e}");
                return Err(e);
            }
        };

        let current = self.state.registry.find_all().await;
        let diff = diff_services(&current, &loaded);

        if diff.is_empty() {
            info!("Configuration unchanged");
            return Ok(());
        }

        for service in &diff.removed {
            if let Err(e) = self.state.manager.stop_service(service).await {
                error!(
                    "service={} component=daemon stop on reload failed: {e}",
                    service.name
                );
            }
            self.state.restart_controller.reset(service.id).await;
            self.state.registry.remove(service.id).await;
        }

        for (old, new) in &diff.changed {
            if let Err(e) = self.state.manager.stop_service(old).await {
                error!(
                    "service={} component=daemon stop on reload failed: {e}",
                    old.name
                );
            }
            self.state.restart_controller.reset(old.id).await;
            self.state.registry.remove(old.id).await;

            if let Err(e) = self.state.registry.insert(new.clone()).await {
                error!(
                    "service={} component=daemon re-register failed: {e}",
                    new.name
                );
                continue;
            }
            if new.enabled {
                if let Err(e) = self.state.manager.start_service(new).await {
                    error!(
                        "service={} component=daemon kind={} start on reload failed: {e}",
                        new.name,
                        e.kind()
                    );
                }
            }
        }

        for service in &diff.added {
            if let Err(e) = self.state.registry.insert(service.clone()).await {
                error!(
                    "service={} component=daemon register failed: {e}",
                    service.name
                );
                continue;
            }
            if service.enabled {
                if let Err(e) = self.state.manager.start_service(service).await {
                    error!(
                        "service={} component=daemon kind={} start on reload failed: {e}",
                        service.name,
                        e.kind()
                    );
                }
            }
        }

        if self.state.settings.health_monitoring_enabled {
            let services = self.state.registry.find_all().await;
            self.state.monitor.start_monitoring(&services).await;
        }

        info!(
            "Configuration reloaded ({} added, {} removed, {} changed)",
            diff.added.len(),
            diff.removed.len(),
            diff.changed.len()
        );
        Ok(())
    }

    pub async fn status(&self) -> DaemonStatusInfo {
        let started_at = *self.state.started_at.lock().await;
        let uptime_seconds =
            started_at.map(|t| ((Utc::now() - t).num_milliseconds().max(0) as f64) / 1000.0);

        DaemonStatusInfo {
            running: self.is_running(),
            pid: Some(std::process::id()),
            started_at,
            uptime_seconds,
            managed_services: self.state.registry.len().await,
            active_forwards: self.state.manager.active_forwards_count().await,
            health_monitoring_enabled: self.state.monitor.is_monitoring().await,
            last_health_check_at: self.state.monitor.last_check_at().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{
        BTreeMap,
        HashMap,
        HashSet,
    };
    use std::io::Write;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use localport_commons::models::service_model::ForwardingTechnology;
    use localport_forward::adapters::TransportAdapter;
    use localport_forward::ForwardError;
    use tempfile::NamedTempFile;

    use super::*;

    struct StubAdapter {
        next_pid: AtomicU32,
        start_calls: AtomicU32,
        alive: std::sync::Mutex<HashSet<u32>>,
    }

    impl StubAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next_pid: AtomicU32::new(7000),
                start_calls: AtomicU32::new(0),
                alive: std::sync::Mutex::new(HashSet::new()),
            })
        }

        fn start_calls(&self) -> u32 {
            self.start_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransportAdapter for StubAdapter {
        fn technology(&self) -> ForwardingTechnology {
            ForwardingTechnology::Ssh
        }

        async fn start_port_forward(
            &self, _local_port: u16, _remote_port: u16,
            _connection_info: &BTreeMap<String, String>,
        ) -> Result<u32, ForwardError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
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

    fn test_settings() -> DaemonSettings {
        DaemonSettings {
            write_pid_file: false,
            maintenance_interval: Duration::from_secs(3600),
            ..DaemonSettings::default()
        }
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn service_entry(name: &str, local_port: u16, remote_port: u16, enabled: bool) -> String {
        format!(
            "  - name: {name}\n    technology: ssh\n    local_port: {local_port}\n    remote_port: {remote_port}\n    enabled: {enabled}\n    connection_info:\n      host: bastion\n"
        )
    }

    fn runtime_with_stub(config: &NamedTempFile) -> (DaemonRuntime, Arc<StubAdapter>) {
        let adapter = StubAdapter::new();
        let mut adapters: HashMap<ForwardingTechnology, Arc<dyn TransportAdapter>> =
            HashMap::new();
        adapters.insert(ForwardingTechnology::Ssh, adapter.clone());
        let manager = Arc::new(ServiceManager::with_adapters(adapters));

        let runtime = DaemonRuntime::with_manager(
            Some(config.path().to_path_buf()),
            test_settings(),
            manager,
        );
        (runtime, adapter)
    }

    #[tokio::test]
    async fn test_boot_starts_enabled_services_and_stop_reaps_children() {
        let ports = (
            portpicker::pick_unused_port().unwrap(),
            portpicker::pick_unused_port().unwrap(),
        );
        let config = write_config(&format!(
            "services:\n{}{}",
            service_entry("a", ports.0, 80, true),
            service_entry("b", ports.1, 81, true)
        ));
        let (runtime, adapter) = runtime_with_stub(&config);

        runtime.start().await.unwrap();
        assert!(runtime.is_running());
        assert_eq!(runtime.manager().active_forwards_count().await, 2);

        let status = runtime.status().await;
        assert!(status.running);
        assert_eq!(status.managed_services, 2);
        assert_eq!(status.active_forwards, 2);

        runtime.stop(None).await;
        assert!(!runtime.is_running());
        assert_eq!(runtime.manager().active_forwards_count().await, 0);
        assert!(adapter.alive.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_services_stay_down() {
        let ports = (
            portpicker::pick_unused_port().unwrap(),
            portpicker::pick_unused_port().unwrap(),
        );
        let config = write_config(&format!(
            "services:\n{}{}",
            service_entry("on", ports.0, 80, true),
            service_entry("off", ports.1, 81, false)
        ));
        let (runtime, adapter) = runtime_with_stub(&config);

        runtime.start().await.unwrap();
        assert_eq!(runtime.manager().active_forwards_count().await, 1);
        assert_eq!(adapter.start_calls(), 1);

        runtime.stop(None).await;
    }

    #[tokio::test]
    async fn test_boot_fails_on_invalid_config() {
        let config = write_config("services:\n  - name: bad\n    technology: ssh\n    local_port: 0\n    remote_port: 80\n    connection_info: { host: a }\n");
        let (runtime, _adapter) = runtime_with_stub(&config);

        assert!(runtime.start().await.is_err());
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_reload_applies_add_remove_change() {
        let (port_a, port_b, port_c) = (
            portpicker::pick_unused_port().unwrap(),
            portpicker::pick_unused_port().unwrap(),
            portpicker::pick_unused_port().unwrap(),
        );
        let config = write_config(&format!(
            "services:\n{}{}",
            service_entry("a", port_a, 80, true),
            service_entry("c", port_c, 90, true)
        ));
        let (runtime, adapter) = runtime_with_stub(&config);

        runtime.start().await.unwrap();
        assert_eq!(adapter.start_calls(), 2);

        // b added, a removed, c's remote port changed.
        std::fs::write(
            config.path(),
            format!(
                "services:\n{}{}",
                service_entry("b", port_b, 85, true),
                service_entry("c", port_c, 91, true)
            ),
        )
        .unwrap();

        runtime.reload().await.unwrap();

        let registry = runtime.registry();
        assert!(registry.get_by_name("a").await.is_none());
        assert!(registry.get_by_name("b").await.is_some());
        assert_eq!(registry.get_by_name("c").await.unwrap().remote_port, 91);
        assert_eq!(runtime.manager().active_forwards_count().await, 2);
        // 2 boot starts + b + restarted c.
        assert_eq!(adapter.start_calls(), 4);

        runtime.stop(None).await;
    }

    #[tokio::test]
    async fn test_reload_with_unchanged_config_is_noop() {
        let port = portpicker::pick_unused_port().unwrap();
        let config = write_config(&format!(
            "services:\n{}",
            service_entry("a", port, 80, true)
        ));
        let (runtime, adapter) = runtime_with_stub(&config);

        runtime.start().await.unwrap();
        let forwards_before = runtime.manager().active_forwards().await;

        runtime.reload().await.unwrap();

        assert_eq!(adapter.start_calls(), 1);
        assert_eq!(runtime.manager().active_forwards().await, forwards_before);

        runtime.stop(None).await;
    }

    #[tokio::test]
    async fn test_reload_keeps_old_config_when_new_is_invalid() {
        let port = portpicker::pick_unused_port().unwrap();
        let config = write_config(&format!(
            "services:\n{}",
            service_entry("a", port, 80, true)
        ));
        let (runtime, _adapter) = runtime_with_stub(&config);

        runtime.start().await.unwrap();
        std::fs::write(config.path(), "services: [ {{ broken").unwrap();

        assert!(runtime.reload().await.is_err());
        assert!(runtime.registry().get_by_name("a").await.is_some());
        assert_eq!(runtime.manager().active_forwards_count().await, 1);

        runtime.stop(None).await;
    }

    #[tokio::test]
    async fn test_run_until_shutdown_reacts_to_request() {
        let port = portpicker::pick_unused_port().unwrap();
        let config = write_config(&format!(
            "services:\n{}",
            service_entry("a", port, 80, true)
        ));
        let (runtime, adapter) = runtime_with_stub(&config);

        runtime.start().await.unwrap();

        let waiter = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.run_until_shutdown().await })
        };

        runtime.request_shutdown();
        tokio::time::timeout(Duration::from_secs(10), waiter)
            .await
            .expect("shutdown did not complete")
            .unwrap();

        assert!(!runtime.is_running());
        assert!(adapter.alive.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let port = portpicker::pick_unused_port().unwrap();
        let config = write_config(&format!(
            "services:\n{}",
            service_entry("a", port, 80, true)
        ));
        let (runtime, _adapter) = runtime_with_stub(&config);

        runtime.start().await.unwrap();
        runtime.stop(None).await;
        runtime.stop(None).await;
        assert!(!runtime.is_running());
    }
}
