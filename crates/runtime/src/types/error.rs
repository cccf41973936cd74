//! Top-level error type and failure stages for the control plane

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cloud::{LedgerError, ProviderError};
use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::models::ModelCatalogError;
use crate::routing::RoutingError;
use crate::scheduler::SchedulerError;
use crate::services::{BootError, ServiceError};

/// Which part of the control plane produced a failure.
///
/// Every error that reaches a caller is tagged with one of these so that a
/// failure is never opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Local,
    Cloud,
    Capacity,
    Service,
    Registry,
    Config,
}

impl std::fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorStage::Local => "local",
            ErrorStage::Cloud => "cloud",
            ErrorStage::Capacity => "capacity",
            ErrorStage::Service => "service",
            ErrorStage::Registry => "registry",
            ErrorStage::Config => "config",
        };
        f.write_str(name)
    }
}

/// Main control plane error type
#[derive(Error, Debug)]
pub enum KilnError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Model catalog error: {0}")]
    Catalog(#[from] ModelCatalogError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Boot error: {0}")]
    Boot(#[from] BootError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Cloud provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Cost ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KilnError {
    pub fn stage(&self) -> ErrorStage {
        match self {
            KilnError::Configuration(_) => ErrorStage::Config,
            KilnError::Catalog(_) => ErrorStage::Registry,
            KilnError::Scheduler(_) => ErrorStage::Capacity,
            KilnError::Routing(e) => e.stage(),
            KilnError::Service(_) | KilnError::Boot(_) => ErrorStage::Service,
            KilnError::Engine(_) | KilnError::Internal(_) => ErrorStage::Local,
            KilnError::Provider(_) | KilnError::Ledger(_) => ErrorStage::Cloud,
        }
    }
}
