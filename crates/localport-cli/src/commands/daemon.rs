use std::process::ExitCode;
use std::time::Duration;

use localport_commons::utils::pid_file::read_pid_file;
use localport_daemon::{
    DaemonRuntime,
    DaemonSettings,
};
use localport_forward::network_utils::is_process_alive;
use log::error;
use tokio::time::sleep;

use crate::cli::{
    Cli,
    DaemonAction,
};
use crate::exit::{
    code,
    EXIT_FAILURE,
    EXIT_OK,
    EXIT_USAGE,
};

pub async fn run(cli: &Cli, action: &DaemonAction) -> anyhow::Result<ExitCode> {
    let exit = match action {
        DaemonAction::Start => start(cli).await?,
        DaemonAction::Stop => stop().await?,
        DaemonAction::Restart => {
            let stopped = stop().await?;
            if stopped != EXIT_OK {
                stopped
            } else {
                start(cli).await?
            }
        }
        DaemonAction::Status => status().await?,
        DaemonAction::Reload => reload().await?,
    };
    Ok(code(exit))
}

/// Runs the daemon in the foreground until TERM/INT. Use a service manager
/// (systemd, launchd) or shell job control to put it in the background.
async fn start(cli: &Cli) -> anyhow::Result<u8> {
    if let Ok(Some(pid)) = read_pid_file() {
        if is_process_alive(pid) {
            eprintln!("Error: daemon already running (pid {pid})");
            return Ok(EXIT_FAILURE);
        }
    }

    let runtime = DaemonRuntime::new(cli.config.clone(), DaemonSettings::default());

    if let Err(e) = runtime.start().await {
        error!("Daemon failed to start: {e:#}");
        eprintln!("Error: {e:#}");
        return Ok(EXIT_USAGE);
    }

    runtime.run_until_shutdown().await;
    Ok(EXIT_OK)
}

async fn stop() -> anyhow::Result<u8> {
    let Some(pid) = read_pid_file()? else {
        println!("Daemon is not running");
        return Ok(EXIT_OK);
    };

    if !is_process_alive(pid) {
        println!("Daemon is not running (stale pid file for {pid})");
        return Ok(EXIT_OK);
    }

    send_signal(pid, Signal::Terminate)?;
    println!("Sent shutdown to daemon (pid {pid})");

    // The daemon's graceful window is 30s; give it a little past that.
    for _ in 0..35 {
        if !is_process_alive(pid) {
            println!("Daemon stopped");
            return Ok(EXIT_OK);
        }
        sleep(Duration::from_secs(1)).await;
    }

    eprintln!("Error: daemon (pid {pid}) did not stop in time");
    Ok(EXIT_FAILURE)
}

async fn status() -> anyhow::Result<u8> {
    match read_pid_file()? {
        Some(pid) if is_process_alive(pid) => {
            println!("Daemon is running (pid {pid})");
        }
        Some(pid) => {
            println!("Daemon is not running (stale pid file for {pid})");
        }
        None => println!("Daemon is not running"),
    }
    Ok(EXIT_OK)
}

async fn reload() -> anyhow::Result<u8> {
    let Some(pid) = read_pid_file()? else {
        eprintln!("Error: daemon is not running");
        return Ok(EXIT_FAILURE);
    };

    if !is_process_alive(pid) {
        eprintln!("Error: daemon is not running (stale pid file for {pid})");
        return Ok(EXIT_FAILURE);
    }

    send_signal(pid, Signal::Reload)?;
    println!("Sent reload to daemon (pid {pid})");
    Ok(EXIT_OK)
}

enum Signal {
    Terminate,
    Reload,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> anyhow::Result<()> {
    let signum = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Reload => libc::SIGUSR1,
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, signum) };
    if rc != 0 {
        anyhow::bail!("failed to signal pid {pid}: {}", std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) -> anyhow::Result<()> {
    anyhow::bail!("daemon control signals are not supported on this platform")
}
