use std::collections::BTreeMap;

use async_trait::async_trait;
use localport_commons::models::service_model::ForwardingTechnology;
use log::info;
use tokio::process::Command;

use crate::adapters::process::ChildRegistry;
use crate::adapters::TransportAdapter;
use crate::error::ForwardError;

/// Forwards through an `ssh -N -L` tunnel. BatchMode keeps the child from
/// hanging on interactive prompts; ExitOnForwardFailure makes a rejected
/// bind fail the child instead of leaving a half-open session.
pub struct SshAdapter {
    children: ChildRegistry,
}

impl SshAdapter {
    pub fn new() -> Self {
        Self {
            children: ChildRegistry::new("ssh"),
        }
    }

    fn build_command(
        local_port: u16, remote_port: u16, connection_info: &BTreeMap<String, String>,
    ) -> Result<Command, ForwardError> {
        let host = connection_info.get("host").ok_or_else(|| {
            ForwardError::InvalidArguments("ssh forward requires 'host'".to_string())
        })?;

        let remote_host = connection_info
            .get("remote_host")
            .map(String::as_str)
            .unwrap_or("localhost");

        let mut command = Command::new("ssh");
        command
            .arg("-N")
            .args(["-L", &format!("{local_port}:{remote_host}:{remote_port}")])
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "ExitOnForwardFailure=yes"])
            .args(["-o", "ServerAliveInterval=30"]);

        if let Some(port) = connection_info.get("port") {
            command.args(["-p", port]);
        }
        if let Some(key_file) = connection_info.get("key_file") {
            command.args(["-i", key_file]);
        }

        let destination = match connection_info.get("user") {
            Some(user) => format!("{user}@{host}"),
            None => host.clone(),
        };
        command.arg(destination);

        Ok(command)
    }
}

impl Default for SshAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for SshAdapter {
    fn technology(&self) -> ForwardingTechnology {
        ForwardingTechnology::Ssh
    }

    async fn start_port_forward(
        &self, local_port: u16, remote_port: u16, connection_info: &BTreeMap<String, String>,
    ) -> Result<u32, ForwardError> {
        let command = Self::build_command(local_port, remote_port, connection_info)?;
        let pid = self.children.spawn(command).await?;

        info!("ssh forwarding 127.0.0.1:{local_port} -> {remote_port} (pid {pid})");
        Ok(pid)
    }

    async fn stop_port_forward(&self, pid: u32) -> Result<(), ForwardError> {
        self.children.stop(pid).await
    }

    async fn is_process_alive(&self, pid: u32) -> bool {
        self.children.is_alive(pid).await
    }

    async fn cleanup_all_processes(&self) -> Result<(), ForwardError> {
        self.children.cleanup_all().await
    }
}
