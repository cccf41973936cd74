//! HTTP API module for the Kiln control plane
//!
//! Compiled only with the `http-api` feature.

#[cfg(feature = "http-api")]
pub mod server;

#[cfg(feature = "http-api")]
pub mod routes;

#[cfg(feature = "http-api")]
pub mod types;

#[cfg(feature = "http-api")]
pub use server::{create_router, HttpApiConfig, HttpApiServer};
