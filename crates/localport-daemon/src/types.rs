use std::time::Duration;

/// Control events delivered to the daemon's control task. Signal handlers
/// only translate signals into these; all real work runs on the scheduler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlEvent {
    Shutdown,
    Reload,
}

#[derive(Clone, Debug)]
pub struct DaemonSettings {
    pub auto_start_services: bool,
    pub health_monitoring_enabled: bool,
    pub config_reload_enabled: bool,
    pub graceful_shutdown_timeout: Duration,
    pub maintenance_interval: Duration,
    /// Disabled in tests so parallel runs do not fight over the pid file.
    pub write_pid_file: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            auto_start_services: true,
            health_monitoring_enabled: true,
            config_reload_enabled: true,
            graceful_shutdown_timeout: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(300),
            write_pid_file: true,
        }
    }
}
