use std::collections::BTreeMap;
use std::time::{
    Duration,
    Instant,
};

use async_trait::async_trait;
use localport_commons::models::service_model::HealthCheckKind;
use log::debug;
use serde::Deserialize;

use crate::probes::{
    Probe,
    ProbeError,
};

#[derive(Debug, Deserialize)]
struct HttpProbeConfig {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    expected_status_codes: Vec<u16>,
    #[serde(default)]
    expected_content: Option<String>,
}

/// HTTP request probe: healthy iff the status is in the expected set
/// (default: any 2xx) and, when configured, the body contains the expected
/// substring.
#[derive(Debug)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    method: reqwest::Method,
    headers: BTreeMap<String, String>,
    expected_status_codes: Vec<u16>,
    expected_content: Option<String>,
}

impl HttpProbe {
    pub fn from_config(
        config: &BTreeMap<String, serde_yaml::Value>, local_port: u16,
    ) -> Result<Self, ProbeError> {
        let parsed: HttpProbeConfig =
            serde_yaml::to_value(config)
            .and_then(serde_yaml::from_value)
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;

        let method = match parsed.method.as_deref() {
            None => reqwest::Method::GET,
            Some(raw) => reqwest::Method::from_bytes(raw.to_uppercase().as_bytes())
                .map_err(|_| ProbeError::InvalidConfig(format!("invalid HTTP method '{raw}'")))?,
        };

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            url: parsed
                .url
                .unwrap_or_else(|| format!("http://127.0.0.1:{local_port}/")),
            method,
            headers: parsed.headers,
            expected_status_codes: parsed.expected_status_codes,
            expected_content: parsed.expected_content,
        })
    }

    fn status_matches(&self, status: u16) -> bool {
        if self.expected_status_codes.is_empty() {
            (200..300).contains(&status)
        } else {
            self.expected_status_codes.contains(&status)
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn kind(&self) -> HealthCheckKind {
        HealthCheckKind::Http
    }

    async fn check(&self, limit: Duration) -> Result<Duration, ProbeError> {
        let started = Instant::now();

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .timeout(limit);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(limit)
            } else {
                ProbeError::Connect(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !self.status_matches(status) {
            return Err(ProbeError::UnexpectedResponse(format!(
                "{} returned status {status}",
                self.url
            )));
        }

        if let Some(expected) = &self.expected_content {
            let body = response
                .text()
                .await
                .map_err(|e| ProbeError::Connect(e.to_string()))?;
            if !body.contains(expected) {
                return Err(ProbeError::UnexpectedResponse(format!(
                    "{} body does not contain '{expected}'",
                    self.url
                )));
            }
        }

        let latency = started.elapsed();
        debug!(
            "http probe {} ok ({status}) in {}ms",
            self.url,
            latency.as_millis()
        );
        Ok(latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_with(expected: Vec<u16>) -> HttpProbe {
        let mut config = BTreeMap::new();
        if !expected.is_empty() {
            config.insert(
                "expected_status_codes".to_string(),
                serde_yaml::to_value(&expected).unwrap(),
            );
        }
        HttpProbe::from_config(&config, 8080).unwrap()
    }

    #[test]
    fn test_default_expects_any_2xx() {
        let probe = probe_with(Vec::new());

        assert!(probe.status_matches(200));
        assert!(probe.status_matches(204));
        assert!(!probe.status_matches(301));
        assert!(!probe.status_matches(500));
    }

    #[test]
    fn test_explicit_status_set_is_exact() {
        let probe = probe_with(vec![200, 301]);

        assert!(probe.status_matches(301));
        assert!(!probe.status_matches(204));
    }

    #[test]
    fn test_url_defaults_to_local_port() {
        let probe = HttpProbe::from_config(&BTreeMap::new(), 9090).unwrap();
        assert_eq!(probe.url, "http://127.0.0.1:9090/");
        assert_eq!(probe.method, reqwest::Method::GET);
    }

    #[test]
    fn test_invalid_method_rejected() {
        let mut config = BTreeMap::new();
        config.insert(
            "method".to_string(),
            serde_yaml::Value::String("GE T".to_string()),
        );

        let err = HttpProbe::from_config(&config, 8080).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_probe_error() {
        let port = portpicker::pick_unused_port().unwrap();
        let mut config = BTreeMap::new();
        config.insert(
            "url".to_string(),
            serde_yaml::Value::String(format!("http://127.0.0.1:{port}/healthz")),
        );

        let probe = HttpProbe::from_config(&config, port).unwrap();
        let err = probe.check(Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Connect(_) | ProbeError::Timeout(_)
        ));
    }
}
