use std::collections::BTreeMap;
use std::time::{
    Duration,
    Instant,
};

use async_trait::async_trait;
use localport_commons::models::service_model::HealthCheckKind;
use log::debug;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::probes::{
    Probe,
    ProbeError,
};

#[derive(Debug, Default, Deserialize)]
struct TcpProbeConfig {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

/// Plain connect probe: healthy iff a TCP connection to host:port completes
/// within the timeout.
pub struct TcpProbe {
    host: String,
    port: u16,
}

impl TcpProbe {
    pub fn from_config(
        config: &BTreeMap<String, serde_yaml::Value>, local_port: u16,
    ) -> Result<Self, ProbeError> {
        let parsed: TcpProbeConfig =
            serde_yaml::to_value(config)
            .and_then(serde_yaml::from_value)
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            host: parsed.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parsed.port.unwrap_or(local_port),
        })
    }

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn kind(&self) -> HealthCheckKind {
        HealthCheckKind::Tcp
    }

    async fn check(&self, limit: Duration) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        let address = format!("{}:{}", self.host, self.port);

        match timeout(limit, TcpStream::connect(&address)).await {
            Ok(Ok(_stream)) => {
                let latency = started.elapsed();
                debug!("tcp probe {address} ok in {}ms", latency.as_millis());
                Ok(latency)
            }
            Ok(Err(e)) => Err(ProbeError::Connect(format!("{address}: {e}"))),
            Err(_) => Err(ProbeError::Timeout(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_probe_succeeds_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::new("127.0.0.1", port);
        let latency = probe.check(Duration::from_secs(1)).await.unwrap();
        assert!(latency < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_probe_fails_against_closed_port() {
        let port = portpicker::pick_unused_port().unwrap();

        let probe = TcpProbe::new("127.0.0.1", port);
        let err = probe.check(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Connect(_)));
    }

    #[test]
    fn test_config_defaults_to_local_port() {
        let probe = TcpProbe::from_config(&BTreeMap::new(), 15432).unwrap();
        assert_eq!(probe.port, 15432);
        assert_eq!(probe.host, "127.0.0.1");
    }

    #[test]
    fn test_config_overrides() {
        let mut config = BTreeMap::new();
        config.insert(
            "host".to_string(),
            serde_yaml::Value::String("10.0.0.5".to_string()),
        );
        config.insert("port".to_string(), serde_yaml::Value::Number(9000.into()));

        let probe = TcpProbe::from_config(&config, 15432).unwrap();
        assert_eq!(probe.host, "10.0.0.5");
        assert_eq!(probe.port, 9000);
    }
}
