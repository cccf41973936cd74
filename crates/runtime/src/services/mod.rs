//! Background service supervision
//!
//! - [`ServiceGraph`]: static descriptors, resolved boot phases and live status
//! - [`BootSequencer`]: phased start-up gated on critical services
//! - [`HealthGuardian`]: cancellable polling loop applying the restart policy
//! - [`LogBuffer`]: bounded ring of recent guardian observations
//!
//! Service lifecycle:
//!
//! ```text
//! dormant -> starting -> healthy <-> unhealthy -> failed
//! ```
//!
//! `failed` is terminal until an operator resets the service.

pub mod boot;
pub mod graph;
pub mod health;
pub mod launcher;
pub mod log_buffer;
pub mod probe;

pub use boot::{BootReport, BootSequencer, PhaseReport};
pub use graph::{BootPhase, ServiceCounts, ServiceGraph, ServiceSnapshot};
pub use health::{CycleSummary, GuardianHandle, HealthGuardian};
pub use launcher::{CommandLauncher, ServiceLauncher};
pub use log_buffer::{LogBuffer, LogEntry, LogLevel};
pub use probe::{HealthProbe, HealthTarget, NetworkProbe, ProbeResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigError, RestartOverride};

/// Service graph errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown service: {id}")]
    UnknownService { id: String },

    #[error("Duplicate service id: {id}")]
    DuplicateService { id: String },

    #[error("Service {service} depends on unknown service {dependency}")]
    UnknownDependency { service: String, dependency: String },

    #[error("Dependency cycle between services: {}", .services.join(" -> "))]
    DependencyCycle { services: Vec<String> },

    #[error("Service {service} has an invalid health address '{address}'")]
    InvalidHealthAddress { service: String, address: String },

    #[error("Service {service} has an invalid restart override: {reason}")]
    InvalidRestartOverride { service: String, reason: String },

    #[error("Failed to launch {service}: {reason}")]
    LaunchFailed { service: String, reason: String },

    #[error("Service {service} has failed and requires a reset")]
    Failed { service: String },

    #[error("Failed to load service catalogue: {0}")]
    Load(#[from] ConfigError),
}

/// Boot sequencer errors
#[derive(Debug, Error)]
pub enum BootError {
    #[error("Boot phase {phase} timed out waiting for critical services: {}", .pending.join(", "))]
    PhaseTimedOut { phase: u32, pending: Vec<String> },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Static description of one background service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Must be healthy before boot moves past its phase
    #[serde(default)]
    pub critical: bool,
    /// Started on first use rather than during boot
    #[serde(default)]
    pub on_demand: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// `http(s)://…` for an HTTP 2xx probe, `tcp://host:port` for a connect probe
    pub health: String,
    /// Command and arguments used to (re)start the service; absent when
    /// the service is managed externally
    #[serde(default)]
    pub start: Option<Vec<String>>,
    /// Minimum boot phase; raised as needed to follow dependencies
    #[serde(default)]
    pub phase: Option<u32>,
    #[serde(default)]
    pub restart: Option<RestartOverride>,
}

impl ServiceDescriptor {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// On-disk shape of the service catalogue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesFile {
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

/// Lifecycle state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Not started; on-demand services rest here until first use
    Dormant,
    Starting,
    Healthy,
    Unhealthy,
    /// Restart budget exhausted
    Failed,
}

impl ServiceState {
    /// Whether the health guardian polls a service in this state
    pub fn is_monitored(self) -> bool {
        matches!(
            self,
            ServiceState::Starting | ServiceState::Healthy | ServiceState::Unhealthy
        )
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceState::Dormant => "dormant",
            ServiceState::Starting => "starting",
            ServiceState::Healthy => "healthy",
            ServiceState::Unhealthy => "unhealthy",
            ServiceState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Live status of a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub consecutive_failures: u32,
    pub restart_attempts: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub last_error: Option<String>,
    /// When the service last entered `starting`
    #[serde(skip)]
    pub started_at: Option<tokio::time::Instant>,
    /// Probes are skipped until this instant while a restart settles
    #[serde(skip)]
    pub next_probe_at: Option<tokio::time::Instant>,
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self {
            state: ServiceState::Dormant,
            consecutive_failures: 0,
            restart_attempts: 0,
            last_check: None,
            last_latency_ms: None,
            last_error: None,
            started_at: None,
            next_probe_at: None,
        }
    }
}
