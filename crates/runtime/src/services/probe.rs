//! Health probes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Parsed health-check address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTarget {
    /// Healthy when a GET returns 2xx
    Http(String),
    /// Healthy when a TCP connection is accepted
    Tcp(String),
}

impl HealthTarget {
    pub fn parse(address: &str) -> Option<Self> {
        let address = address.trim();
        if address.starts_with("http://") || address.starts_with("https://") {
            return Some(HealthTarget::Http(address.to_string()));
        }
        let host_port = address.strip_prefix("tcp://")?;
        let (host, port) = host_port.rsplit_once(':')?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return None;
        }
        Some(HealthTarget::Tcp(host_port.to_string()))
    }
}

/// Outcome of one probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency_ms: latency.as_millis() as u64,
            detail: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms: latency.as_millis() as u64,
            detail: Some(detail.into()),
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe once. Failure to reach the target is an unhealthy result, not an error.
    async fn probe(&self, service_id: &str, target: &HealthTarget) -> ProbeResult;
}

/// HTTP and TCP probe over the network
pub struct NetworkProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client for probes: {}", e);
                reqwest::Client::new()
            });
        Self { client, timeout }
    }
}

#[async_trait]
impl HealthProbe for NetworkProbe {
    async fn probe(&self, _service_id: &str, target: &HealthTarget) -> ProbeResult {
        let start = Instant::now();
        match target {
            HealthTarget::Http(url) => match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    ProbeResult::healthy(start.elapsed())
                }
                Ok(response) => ProbeResult::unhealthy(
                    start.elapsed(),
                    format!("HTTP {}", response.status()),
                ),
                Err(e) => ProbeResult::unhealthy(start.elapsed(), e.to_string()),
            },
            HealthTarget::Tcp(addr) => {
                match tokio::time::timeout(self.timeout, TcpStream::connect(addr.as_str())).await {
                    Ok(Ok(_)) => ProbeResult::healthy(start.elapsed()),
                    Ok(Err(e)) => ProbeResult::unhealthy(start.elapsed(), e.to_string()),
                    Err(_) => ProbeResult::unhealthy(
                        start.elapsed(),
                        format!("connect timed out after {:?}", self.timeout),
                    ),
                }
            }
        }
    }
}
