//! Cloud fallback
//!
//! The escape hatch used when local inference is unavailable: an ordered
//! list of remote providers plus a ledger of what the fallback has cost.

pub mod client;
pub mod ledger;

pub use client::CloudFallbackClient;
pub use ledger::{CostEntry, CostLedger, CostSummary, LedgerError, ProviderSpend};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChatMessage, TokenUsage};

/// Why a cloud provider did not produce a response
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("No cloud providers configured")]
    NoProvidersConfigured,

    #[error("Provider {provider} skipped: credentials missing")]
    CredentialsMissing { provider: String },

    #[error("Provider {provider} request failed: {reason}")]
    Request { provider: String, reason: String },

    #[error("Provider {provider} returned {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Provider {provider} sent an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ProviderError {
    pub fn provider(&self) -> Option<&str> {
        match self {
            ProviderError::NoProvidersConfigured => None,
            ProviderError::CredentialsMissing { provider }
            | ProviderError::Request { provider, .. }
            | ProviderError::Status { provider, .. }
            | ProviderError::InvalidResponse { provider, .. } => Some(provider),
        }
    }
}

/// Successful cloud completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudResponse {
    pub provider: String,
    pub model: String,
    pub message: ChatMessage,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub latency_ms: u64,
}
