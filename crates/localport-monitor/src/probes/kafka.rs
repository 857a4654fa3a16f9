use std::collections::BTreeMap;
use std::time::{
    Duration,
    Instant,
};

use async_trait::async_trait;
use localport_commons::models::service_model::HealthCheckKind;
use log::debug;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer,
    Consumer,
};
use serde::Deserialize;
use tokio::task;

use crate::probes::{
    Probe,
    ProbeError,
};

#[derive(Debug, Default, Deserialize)]
struct KafkaProbeConfig {
    #[serde(default)]
    bootstrap_servers: Option<String>,
}

/// Broker metadata probe: healthy iff cluster metadata comes back within
/// the timeout. The rdkafka metadata call is blocking, so each check runs
/// on the blocking worker pool rather than the async scheduler.
pub struct KafkaProbe {
    bootstrap_servers: String,
}

impl KafkaProbe {
    pub fn from_config(
        config: &BTreeMap<String, serde_yaml::Value>, local_port: u16,
    ) -> Result<Self, ProbeError> {
        let parsed: KafkaProbeConfig =
            serde_yaml::to_value(config)
            .and_then(serde_yaml::from_value)
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            bootstrap_servers: parsed
                .bootstrap_servers
                .unwrap_or_else(|| format!("127.0.0.1:{local_port}")),
        })
    }
}

#[async_trait]
impl Probe for KafkaProbe {
    fn kind(&self) -> HealthCheckKind {
        HealthCheckKind::Kafka
    }

    async fn check(&self, limit: Duration) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        let servers = self.bootstrap_servers.clone();

        let result = task::spawn_blocking(move || {
            let consumer: BaseConsumer = ClientConfig::new()
                .set("bootstrap.servers", &servers)
                .set("socket.timeout.ms", limit.as_millis().to_string())
                .create()
                .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;

            let metadata = consumer
                .fetch_metadata(None, limit)
                .map_err(|e| ProbeError::Connect(format!("{servers}: {e}")))?;

            Ok::<usize, ProbeError>(metadata.brokers().len())
        })
        .await
        .map_err(|e| ProbeError::Connect(format!("kafka probe task failed: {e}")))?;

        let broker_count = result?;
        if broker_count == 0 {
            return Err(ProbeError::UnexpectedResponse(format!(
                "{}: metadata contained no brokers",
                self.bootstrap_servers
            )));
        }

        let latency = started.elapsed();
        debug!(
            "kafka probe {} ok ({broker_count} broker(s)) in {}ms",
            self.bootstrap_servers,
            latency.as_millis()
        );
        Ok(latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_defaults_to_local_port() {
        let probe = KafkaProbe::from_config(&BTreeMap::new(), 19092).unwrap();
        assert_eq!(probe.bootstrap_servers, "127.0.0.1:19092");
    }

    #[test]
    fn test_bootstrap_override() {
        let mut config = BTreeMap::new();
        config.insert(
            "bootstrap_servers".to_string(),
            serde_yaml::Value::String("broker-1:9092,broker-2:9092".to_string()),
        );

        let probe = KafkaProbe::from_config(&config, 19092).unwrap();
        assert_eq!(probe.bootstrap_servers, "broker-1:9092,broker-2:9092");
    }
}
