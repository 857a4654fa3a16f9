use std::collections::BTreeMap;
use std::time::{
    Duration,
    Instant,
};

use async_trait::async_trait;
use localport_commons::models::service_model::HealthCheckKind;
use log::debug;
use serde::Deserialize;
use tokio::time::timeout;
use tokio_postgres::config::SslMode;
use tokio_postgres::NoTls;

use crate::probes::{
    Probe,
    ProbeError,
};

#[derive(Debug, Default, Deserialize)]
struct PostgresProbeConfig {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    sslmode: Option<String>,
}

/// Round-trip probe: healthy iff a connection opens and `SELECT 1` answers
/// within the timeout. The probe connects without a TLS stack (the target
/// is the local tunnel mouth), so only `sslmode` values satisfiable in
/// plaintext are accepted.
#[derive(Debug)]
pub struct PostgresProbe {
    host: String,
    port: u16,
    database: String,
    user: String,
    password: String,
    ssl_mode: Option<SslMode>,
}

impl PostgresProbe {
    pub fn from_config(
        config: &BTreeMap<String, serde_yaml::Value>, local_port: u16,
    ) -> Result<Self, ProbeError> {
        let parsed: PostgresProbeConfig =
            serde_yaml::to_value(config)
            .and_then(serde_yaml::from_value)
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;

        let ssl_mode = match parsed.sslmode.as_deref() {
            None => None,
            Some("disable") => Some(SslMode::Disable),
            Some("prefer") => Some(SslMode::Prefer),
            Some(other) => {
                return Err(ProbeError::InvalidConfig(format!(
                    "unsupported sslmode '{other}' (the probe has no TLS stack; use 'disable' or 'prefer')"
                )));
            }
        };

        Ok(Self {
            host: parsed.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parsed.port.unwrap_or(local_port),
            database: parsed.database.unwrap_or_else(|| "postgres".to_string()),
            user: parsed.user.unwrap_or_else(|| "postgres".to_string()),
            password: parsed.password.unwrap_or_default(),
            ssl_mode,
        })
    }
}

#[async_trait]
impl Probe for PostgresProbe {
    fn kind(&self) -> HealthCheckKind {
        HealthCheckKind::Postgres
    }

    async fn check(&self, limit: Duration) -> Result<Duration, ProbeError> {
        let started = Instant::now();

        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .connect_timeout(limit);
        if !self.password.is_empty() {
            config.password(&self.password);
        }
        if let Some(ssl_mode) = self.ssl_mode {
            config.ssl_mode(ssl_mode);
        }

        let (client, connection) = timeout(limit, config.connect(NoTls))
            .await
            .map_err(|_| ProbeError::Timeout(limit))?
            .map_err(|e| ProbeError::Connect(format!("{}:{}: {e}", self.host, self.port)))?;

        // The connection future drives the socket; it ends when the client
        // drops at the end of this check.
        let driver = tokio::spawn(async move {
            let _ = connection.await;
        });

        let query = timeout(limit, client.simple_query("SELECT 1"))
            .await
            .map_err(|_| ProbeError::Timeout(limit))
            .and_then(|r| r.map_err(|e| ProbeError::UnexpectedResponse(e.to_string())));

        drop(client);
        driver.abort();
        query?;

        let latency = started.elapsed();
        debug!(
            "postgres probe {}:{}/{} ok in {}ms",
            self.host,
            self.port,
            self.database,
            latency.as_millis()
        );
        Ok(latency)
    }
}
