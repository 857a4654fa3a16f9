use std::collections::BTreeMap;

use async_trait::async_trait;
use localport_commons::models::service_model::ForwardingTechnology;
use log::info;
use tokio::process::Command;

use crate::adapters::process::ChildRegistry;
use crate::adapters::TransportAdapter;
use crate::error::ForwardError;

/// Forwards through `kubectl port-forward`. One child per forward; the
/// control-plane connection lives inside kubectl itself.
pub struct KubectlAdapter {
    children: ChildRegistry,
}

impl KubectlAdapter {
    pub fn new() -> Self {
        Self {
            children: ChildRegistry::new("kubectl"),
        }
    }

    fn build_command(
        local_port: u16, remote_port: u16, connection_info: &BTreeMap<String, String>,
    ) -> Result<Command, ForwardError> {
        let resource_name = connection_info.get("resource_name").ok_or_else(|| {
            ForwardError::InvalidArguments("kubectl forward requires 'resource_name'".to_string())
        })?;

        let resource_type = connection_info
            .get("resource_type")
            .map(String::as_str)
            .unwrap_or("service");
        let namespace = connection_info
            .get("namespace")
            .map(String::as_str)
            .unwrap_or("default");

        let mut command = Command::new("kubectl");
        command
            .arg("port-forward")
            .arg(format!("{resource_type}/{resource_name}"))
            .arg(format!("{local_port}:{remote_port}"))
            .args(["-n", namespace])
            .args(["--address", "127.0.0.1"]);

        if let Some(context) = connection_info.get("context") {
            command.args(["--context", context]);
        }
        if let Some(kubeconfig) = connection_info.get("kubeconfig") {
            command.args(["--kubeconfig", kubeconfig]);
        }

        Ok(command)
    }
}

impl Default for KubectlAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for KubectlAdapter {
    fn technology(&self) -> ForwardingTechnology {
        ForwardingTechnology::Kubectl
    }

    async fn start_port_forward(
        &self, local_port: u16, remote_port: u16, connection_info: &BTreeMap<String, String>,
    ) -> Result<u32, ForwardError> {
        let command = Self::build_command(local_port, remote_port, connection_info)?;
        let pid = self.children.spawn(command).await?;

        info!("kubectl forwarding 127.0.0.1:{local_port} -> {remote_port} (pid {pid})");
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
