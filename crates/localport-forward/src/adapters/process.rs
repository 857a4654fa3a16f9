use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use log::{
    debug,
    warn,
};
use tokio::io::{
    AsyncBufReadExt,
    BufReader,
};
use tokio::process::{
    Child,
    Command,
};
use tokio::sync::Mutex;
use tokio::time::{
    sleep,
    timeout,
};

use crate::error::ForwardError;
use crate::network_utils::is_process_alive;

/// How long a freshly spawned forwarder gets to fail fast before we accept
/// the spawn. Catches missing binaries and immediate transport rejections.
const SPAWN_SETTLE: Duration = Duration::from_millis(400);

/// Grace period between the polite termination signal and the hard kill.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Child-process bookkeeping shared by the transport adapters. Every spawned
/// forwarder lands in the map; `cleanup_all` drains it.
pub struct ChildRegistry {
    label: &'static str,
    children: Mutex<HashMap<u32, Child>>,
}

impl ChildRegistry {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns the command with stdin detached and output captured into the
    /// log sink, waits out the settle window, and registers the child.
    pub async fn spawn(&self, mut command: Command) -> Result<u32, ForwardError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| ForwardError::AdapterSpawn {
            technology: self.label,
            message: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| ForwardError::AdapterSpawn {
            technology: self.label,
            message: "child exited before a pid could be read".to_string(),
        })?;

        self.forward_output(&mut child, pid);

        sleep(SPAWN_SETTLE).await;
        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(ForwardError::AdapterTransport {
                    technology: self.label,
                    message: format!("forwarder exited immediately ({status})"),
                });
            }
            Ok(None) => {}
            Err(e) => {
                return Err(ForwardError::AdapterSpawn {
                    technology: self.label,
                    message: e.to_string(),
                });
            }
        }

        debug!("{} forwarder spawned (pid {pid})", self.label);
        self.children.lock().await.insert(pid, child);
        Ok(pid)
    }

    fn forward_output(&self, child: &mut Child, pid: u32) {
        let label = self.label;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{label}:{pid}] {line}");
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("[{label}:{pid}] {line}");
                }
            });
        }
    }

    /// Graceful stop: SIGTERM, bounded wait, SIGKILL. Unknown or
    /// already-dead PIDs return Ok.
    pub async fn stop(&self, pid: u32) -> Result<(), ForwardError> {
        let child = self.children.lock().await.remove(&pid);

        let Some(mut child) = child else {
            debug!("{} pid {pid} not tracked, nothing to stop", self.label);
            return Ok(());
        };

        terminate(pid);

        match timeout(STOP_GRACE, child.wait()).await {
            Ok(_) => {
                debug!("{} pid {pid} exited after termination signal", self.label);
            }
            Err(_) => {
                warn!(
                    "{} pid {pid} ignored termination for {}s, killing",
                    self.label,
                    STOP_GRACE.as_secs()
                );
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }

        Ok(())
    }

    /// Liveness with reaping: owned children are polled via `try_wait` so an
    /// exited forwarder never lingers as a zombie; foreign PIDs fall back to
    /// signal-0 semantics.
    pub async fn is_alive(&self, pid: u32) -> bool {
        let mut children = self.children.lock().await;

        match children.get_mut(&pid) {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!("{} pid {pid} exited ({status})", self.label);
                    children.remove(&pid);
                    false
                }
                Err(_) => false,
            },
            None => is_process_alive(pid),
        }
    }

    /// Stops every tracked child. Total: the registry is drained even when
    /// individual stops misbehave.
    pub async fn cleanup_all(&self) -> Result<(), ForwardError> {
        let drained: Vec<u32> = {
            let children = self.children.lock().await;
            children.keys().copied().collect()
        };

        for pid in drained {
            self.stop(pid).await?;
        }
        Ok(())
    }

    pub async fn tracked_pids(&self) -> Vec<u32> {
        self.children.lock().await.keys().copied().collect()
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}
