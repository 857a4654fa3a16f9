pub mod kubectl;
pub mod process;
pub mod ssh;

use std::collections::{
    BTreeMap,
    HashMap,
};
use std::sync::Arc;

use async_trait::async_trait;
use localport_commons::models::service_model::ForwardingTechnology;

use crate::error::ForwardError;

/// One transport kind (kubectl, ssh, ...). Implementations own every child
/// process they spawn so `cleanup_all_processes` is total even for forwards
/// the caller lost track of.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn technology(&self) -> ForwardingTechnology;

    /// Spawns the external forwarder and returns its PID. Success means the
    /// child is running, not that the tunnel is serving; readiness is the
    /// health monitor's concern.
    async fn start_port_forward(
        &self, local_port: u16, remote_port: u16, connection_info: &BTreeMap<String, String>,
    ) -> Result<u32, ForwardError>;

    /// Terminates the child: graceful signal first, hard kill after a
    /// bounded grace period. Idempotent for PIDs that are already gone.
    async fn stop_port_forward(&self, pid: u32) -> Result<(), ForwardError>;

    /// Liveness for a PID this adapter spawned. Owned children are checked
    /// (and reaped) via wait; foreign PIDs fall back to signal-0.
    async fn is_process_alive(&self, pid: u32) -> bool;

    /// Stops every child this adapter ever started.
    async fn cleanup_all_processes(&self) -> Result<(), ForwardError>;
}

/// The adapter set registered at daemon construction.
pub fn default_adapters() -> HashMap<ForwardingTechnology, Arc<dyn TransportAdapter>> {
    let mut adapters: HashMap<ForwardingTechnology, Arc<dyn TransportAdapter>> = HashMap::new();
    adapters.insert(
        ForwardingTechnology::Kubectl,
        Arc::new(kubectl::KubectlAdapter::new()),
    );
    adapters.insert(ForwardingTechnology::Ssh, Arc::new(ssh::SshAdapter::new()));
    adapters
}
