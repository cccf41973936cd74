//! Error types for the routing module

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cloud::ProviderError;
use crate::types::ErrorStage;

/// One backend the router tried (or deliberately skipped) for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteAttempt {
    pub stage: ErrorStage,
    /// Model or provider name
    pub target: String,
    pub reason: String,
    /// The backend was not attempted (disabled or missing credentials)
    #[serde(default)]
    pub skipped: bool,
    /// The backend could not be reached at all
    #[serde(default)]
    pub unreachable: bool,
}

impl RouteAttempt {
    pub fn failed(stage: ErrorStage, target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage,
            target: target.into(),
            reason: reason.into(),
            skipped: false,
            unreachable: false,
        }
    }

    pub fn unreachable(
        stage: ErrorStage,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            unreachable: true,
            ..Self::failed(stage, target, reason)
        }
    }

    pub fn skipped(stage: ErrorStage, target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::failed(stage, target, reason)
        }
    }
}

impl From<ProviderError> for RouteAttempt {
    fn from(error: ProviderError) -> Self {
        let target = error.provider().unwrap_or("cloud").to_string();
        match error {
            ProviderError::NoProvidersConfigured | ProviderError::CredentialsMissing { .. } => {
                RouteAttempt::skipped(ErrorStage::Cloud, target, error.to_string())
            }
            _ => RouteAttempt::failed(ErrorStage::Cloud, target, error.to_string()),
        }
    }
}

impl std::fmt::Display for RouteAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.target, self.reason)
    }
}

/// Errors that can occur during routing operations
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    #[error("Invalid routing request: {reason}")]
    InvalidRequest { reason: String },

    #[error("All routes exhausted: {}", format_attempts(.attempts))]
    AllRoutesExhausted { attempts: Vec<RouteAttempt> },
}

fn format_attempts(attempts: &[RouteAttempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl RoutingError {
    /// Stage responsible for the failure.
    ///
    /// Capacity is reported only when every attempted backend was rejected
    /// for capacity; otherwise the last backend actually tried wins.
    pub fn stage(&self) -> ErrorStage {
        match self {
            RoutingError::InvalidRequest { .. } => ErrorStage::Local,
            RoutingError::AllRoutesExhausted { attempts } => {
                let tried: Vec<&RouteAttempt> = attempts.iter().filter(|a| !a.skipped).collect();
                if tried.is_empty() {
                    return attempts
                        .last()
                        .map(|a| a.stage)
                        .unwrap_or(ErrorStage::Local);
                }
                if tried.iter().all(|a| a.stage == ErrorStage::Capacity) {
                    return ErrorStage::Capacity;
                }
                tried.last().map(|a| a.stage).unwrap_or(ErrorStage::Local)
            }
        }
    }

    /// No backend was able to take the request at all: every attempt was
    /// skipped, unreachable or refused for capacity.
    pub fn is_unavailable(&self) -> bool {
        match self {
            RoutingError::InvalidRequest { .. } => false,
            RoutingError::AllRoutesExhausted { attempts } => attempts
                .iter()
                .all(|a| a.skipped || a.unreachable || a.stage == ErrorStage::Capacity),
        }
    }

    pub fn attempts(&self) -> &[RouteAttempt] {
        match self {
            RoutingError::InvalidRequest { .. } => &[],
            RoutingError::AllRoutesExhausted { attempts } => attempts,
        }
    }
}
