use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{
    FuturesUnordered,
    StreamExt,
};
use localport_commons::models::response::ServiceStatusInfo;
use localport_commons::models::service_model::ServiceDescriptor;
use localport_commons::utils::config::load_config;
use localport_commons::utils::pid_file::read_pid_file;
use localport_forward::network_utils::is_process_alive;
use localport_forward::{
    ServiceManager,
    ServiceRegistry,
};
use localport_monitor::{
    HealthMonitor,
    RestartController,
};
use log::info;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::cli::{
    Cli,
    OutputFormat,
};
use crate::exit::{
    code,
    EXIT_FAILURE,
    EXIT_INTERRUPT,
    EXIT_OK,
    EXIT_USAGE,
};

fn load_or_usage(cli: &Cli) -> Result<Vec<ServiceDescriptor>, ExitCode> {
    load_config(cli.config.as_ref()).map_err(|e| {
        eprintln!("Error: {e}");
        code(EXIT_USAGE)
    })
}

/// Resolves the requested service set from names, a tag or `--all`.
fn select_services(
    services: Vec<ServiceDescriptor>, names: &[String], all: bool, tag: Option<&str>,
) -> Result<Vec<ServiceDescriptor>, ExitCode> {
    if all {
        return Ok(services.into_iter().filter(|s| s.enabled).collect());
    }

    if let Some(tag) = tag {
        let matching: Vec<_> = services
            .into_iter()
            .filter(|s| s.enabled && s.has_tag(tag))
            .collect();
        if matching.is_empty() {
            eprintln!("Error: no enabled services carry tag '{tag}'");
            return Err(code(EXIT_USAGE));
        }
        return Ok(matching);
    }

    if names.is_empty() {
        eprintln!("Error: no services specified (pass names, --tag or --all)");
        return Err(code(EXIT_USAGE));
    }

    let mut selected = Vec::new();
    for name in names {
        match services.iter().find(|s| &s.name == name) {
            Some(service) => selected.push(service.clone()),
            None => {
                eprintln!("Error: unknown service '{name}'");
                return Err(code(EXIT_USAGE));
            }
        }
    }
    Ok(selected)
}

/// Starts the selected services and supervises them in the foreground until
/// interrupted. Health-checked services get monitoring and automatic
/// restarts, the same machinery the daemon uses.
pub async fn start(
    cli: &Cli, names: &[String], all: bool, tag: Option<&str>, force: bool,
) -> anyhow::Result<ExitCode> {
    let services = match load_or_usage(cli) {
        Ok(services) => services,
        Err(exit) => return Ok(exit),
    };
    let selected = match select_services(services, names, all, tag) {
        Ok(selected) => selected,
        Err(exit) => return Ok(exit),
    };
    if selected.is_empty() {
        println!("No enabled services to start");
        return Ok(code(EXIT_OK));
    }

    let manager = Arc::new(ServiceManager::new());
    let registry = Arc::new(ServiceRegistry::new());
    for service in &selected {
        registry.insert(service.clone()).await?;
    }

    let mut tasks: FuturesUnordered<_> = selected
        .iter()
        .cloned()
        .map(|service| {
            let manager = manager.clone();
            async move {
                if force {
                    let _ = manager.stop_service(&service).await;
                }
                let result = manager.start_service(&service).await;
                (service, result)
            }
        })
        .collect();

    let mut failures = 0;
    while let Some((service, result)) = tasks.next().await {
        match result {
            Ok(forward) => println!(
                "started {:<20} 127.0.0.1:{} -> {} (pid {})",
                service.name, forward.local_port, forward.remote_port, forward.pid
            ),
            Err(e) => {
                failures += 1;
                eprintln!("failed  {:<20} {e}", service.name);
            }
        }
    }

    if failures == selected.len() {
        manager.cleanup_all_processes().await;
        return Ok(code(EXIT_FAILURE));
    }

    let (transition_tx, transition_rx) = mpsc::channel(64);
    let monitor = HealthMonitor::new(manager.clone(), transition_tx);
    monitor.start_monitoring(&selected).await;
    let controller = RestartController::new(manager.clone(), registry.clone());
    let controller_task = controller.run(transition_rx);

    println!("Forwarding active, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping forwards");

    monitor.stop_monitoring().await;
    controller.shutdown();
    let _ = controller_task.await;
    manager.stop_all_services(&selected).await;
    manager.cleanup_all_processes().await;

    println!("Stopped");
    Ok(code(EXIT_INTERRUPT))
}

/// Stops the selected services. Stopping a service that is not running is a
/// success; the operation is idempotent.
pub async fn stop(
    cli: &Cli, names: &[String], all: bool, tag: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let services = match load_or_usage(cli) {
        Ok(services) => services,
        Err(exit) => return Ok(exit),
    };
    let selected = match select_services(services, names, all, tag) {
        Ok(selected) => selected,
        Err(exit) => return Ok(exit),
    };

    let manager = Arc::new(ServiceManager::new());
    let results = manager.stop_all_services(&selected).await;

    let mut failures = 0;
    for result in &results {
        if result.success {
            println!("stopped {}", result.service_name);
        } else {
            failures += 1;
            eprintln!(
                "failed  {} ({})",
                result.service_name,
                result.error.as_deref().unwrap_or("unknown")
            );
        }
    }

    Ok(code(if failures == 0 { EXIT_OK } else { EXIT_FAILURE }))
}

/// Prints per-service status plus the daemon's own state. `--watch` keeps
/// refreshing until interrupted.
pub async fn status(
    cli: &Cli, names: &[String], output: OutputFormat, watch: bool, interval: u64,
) -> anyhow::Result<ExitCode> {
    let services = match load_or_usage(cli) {
        Ok(services) => services,
        Err(exit) => return Ok(exit),
    };

    let selected = if names.is_empty() {
        services
    } else {
        match select_services(services, names, false, None) {
            Ok(selected) => selected,
            Err(exit) => return Ok(exit),
        }
    };

    let manager = Arc::new(ServiceManager::new());

    loop {
        let statuses = manager.get_all_service_status(&selected).await;
        render_status(&statuses, output)?;

        if !watch {
            return Ok(code(EXIT_OK));
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(code(EXIT_INTERRUPT)),
            _ = sleep(Duration::from_secs(interval.max(1))) => println!(),
        }
    }
}

fn render_status(statuses: &[ServiceStatusInfo], output: OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(statuses)?);
        }
        OutputFormat::Table => {
            print_daemon_line();
            println!(
                "{:<20} {:<10} {:>6} {:>7} {:<9} {:>8} {}",
                "SERVICE", "TECH", "LOCAL", "REMOTE", "STATUS", "RESTARTS", "LAST ERROR"
            );
            for status in statuses {
                println!(
                    "{:<20} {:<10} {:>6} {:>7} {:<9} {:>8} {}",
                    status.name,
                    status.technology.to_string(),
                    status.local_port,
                    status.remote_port,
                    status.status.to_string(),
                    status.restart_count,
                    status.last_error.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

fn print_daemon_line() {
    match read_pid_file() {
        Ok(Some(pid)) if is_process_alive(pid) => {
            println!("daemon: running (pid {pid})");
        }
        Ok(_) => println!("daemon: not running"),
        Err(e) => println!("daemon: unknown ({e})"),
    }
}
