//! Accelerator scheduler
//!
//! Admission control for accelerator memory. The scheduler tracks which
//! models are resident, derives the free budget from the model catalog and
//! evicts least-recently-used models to make room. Models flagged
//! `always_resident` are never eviction candidates.
//!
//! All residency mutations happen under one short-held mutex. Engine
//! load/unload calls and telemetry queries run after the lock is released.

pub mod accelerator;
pub mod telemetry;

pub use accelerator::{AcceleratorScheduler, Reservation, ResidentEntry};
pub use telemetry::{
    DisabledTelemetry, GpuReading, GpuTelemetry, NvidiaSmiTelemetry, TelemetryError,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scheduler errors
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error(
        "Capacity exhausted: need {required_gb:.1} GB, {free_gb:.1} GB free and only {reclaimable_gb:.1} GB reclaimable"
    )]
    CapacityExhausted {
        required_gb: f64,
        free_gb: f64,
        reclaimable_gb: f64,
    },

    #[error("Model {model} is pinned as always-resident and cannot be evicted")]
    AlwaysResident { model: String },

    #[error("Invalid capacity request: {reason}")]
    InvalidRequest { reason: String },
}

/// Where accelerator figures came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsSource {
    /// Live driver query
    Telemetry,
    /// Derived from the catalog and the residency map
    Estimate,
}

/// Snapshot of accelerator memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceleratorStats {
    pub capacity_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub headroom_gb: f64,
    /// Sum of footprints the scheduler has admitted
    pub managed_used_gb: f64,
    /// Budget the scheduler will admit against before evicting
    pub budget_free_gb: f64,
    pub resident_models: usize,
    pub source: StatsSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Why telemetry was unavailable, when `source` is `estimate`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry_error: Option<String>,
}
