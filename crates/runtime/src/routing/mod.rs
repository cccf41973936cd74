//! Inference routing
//!
//! Resolves role aliases through the model catalog, reserves accelerator
//! capacity, attempts local inference and falls back to cloud providers in
//! preference order. Every failure along the way is kept so an exhausted
//! request reports each attempt.

pub mod engine;
pub mod error;
pub mod metrics;

pub use engine::{InferenceRouter, RouteOptions, RoutedResponse, RoutedVia};
pub use error::{RouteAttempt, RoutingError};
pub use metrics::{RouterMetrics, RoutingMetrics};
