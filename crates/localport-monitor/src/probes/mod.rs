pub mod http;
pub mod kafka;
pub mod postgres;
pub mod tcp;

use std::time::Duration;

use async_trait::async_trait;
use localport_commons::models::service_model::{
    HealthCheckKind,
    ServiceDescriptor,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("invalid probe config: {0}")]
    InvalidConfig(String),
}

/// One-shot liveness check. Implementations are stateless between
/// invocations; any pooled handle is scoped to the probe object itself.
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> HealthCheckKind;

    /// Runs one check bounded by `timeout`. Returns the observed latency on
    /// success so the monitor can log it.
    async fn check(&self, timeout: Duration) -> Result<Duration, ProbeError>;
}

/// Builds the probe for a service from its health-check section. Probe
/// configs default to the forwarded local port, so a bare `type: tcp`
/// checks the tunnel entrance itself.
pub fn build_probe(service: &ServiceDescriptor) -> Result<Box<dyn Probe>, ProbeError> {
    let check = service.health_check.as_ref().ok_or_else(|| {
        ProbeError::InvalidConfig(format!("service '{}' has no health_check", service.name))
    })?;

    let probe: Box<dyn Probe> = match check.kind {
        HealthCheckKind::Tcp => Box::new(tcp::TcpProbe::from_config(
            &check.config,
            service.local_port,
        )?),
        HealthCheckKind::Http => Box::new(http::HttpProbe::from_config(
            &check.config,
            service.local_port,
        )?),
        HealthCheckKind::Kafka => Box::new(kafka::KafkaProbe::from_config(
            &check.config,
            service.local_port,
        )?),
        HealthCheckKind::Postgres => Box::new(postgres::PostgresProbe::from_config(
            &check.config,
            service.local_port,
        )?),
    };
    Ok(probe)
}
