//! Live accelerator memory telemetry

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

use crate::config::TelemetryConfig;

/// Telemetry errors. Never fatal: the scheduler falls back to an estimate.
#[derive(Debug, Clone, Error)]
pub enum TelemetryError {
    #[error("Telemetry disabled")]
    Disabled,

    #[error("Failed to run {command}: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Telemetry query timed out")]
    Timeout,

    #[error("Unparseable telemetry output: {0}")]
    Parse(String),
}

/// One reading of accelerator memory, in GB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuReading {
    pub name: String,
    pub total_gb: f64,
    pub used_gb: f64,
}

/// Source of live accelerator memory figures
#[async_trait]
pub trait GpuTelemetry: Send + Sync {
    async fn read(&self) -> Result<GpuReading, TelemetryError>;
}

/// Reads memory usage by shelling out to `nvidia-smi`
pub struct NvidiaSmiTelemetry {
    config: TelemetryConfig,
}

impl NvidiaSmiTelemetry {
    pub fn new(config: TelemetryConfig) -> Self {
        Self { config }
    }
}

/// Parse one line of `--query-gpu=name,memory.total,memory.used --format=csv,noheader,nounits`.
///
/// Memory figures are reported in MiB.
pub fn parse_nvidia_smi(output: &str) -> Result<GpuReading, TelemetryError> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| TelemetryError::Parse("empty output".to_string()))?;

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(TelemetryError::Parse(format!(
            "expected 3 fields, got {}: {}",
            fields.len(),
            line
        )));
    }

    let mib = |value: &str| {
        value
            .parse::<f64>()
            .map_err(|_| TelemetryError::Parse(format!("not a number: {}", value)))
    };

    Ok(GpuReading {
        name: fields[0].to_string(),
        total_gb: mib(fields[1])? / 1024.0,
        used_gb: mib(fields[2])? / 1024.0,
    })
}

#[async_trait]
impl GpuTelemetry for NvidiaSmiTelemetry {
    async fn read(&self) -> Result<GpuReading, TelemetryError> {
        if !self.config.enabled {
            return Err(TelemetryError::Disabled);
        }

        let query = Command::new(&self.config.command)
            .arg("--query-gpu=name,memory.total,memory.used")
            .arg("--format=csv,noheader,nounits")
            .arg("-i")
            .arg(self.config.device_index.to_string())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.config.timeout, query)
            .await
            .map_err(|_| TelemetryError::Timeout)?
            .map_err(|e| TelemetryError::CommandFailed {
                command: self.config.command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TelemetryError::CommandFailed {
                command: self.config.command.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Telemetry source that always reports unavailability
pub struct DisabledTelemetry;

#[async_trait]
impl GpuTelemetry for DisabledTelemetry {
    async fn read(&self) -> Result<GpuReading, TelemetryError> {
        Err(TelemetryError::Disabled)
    }
}
