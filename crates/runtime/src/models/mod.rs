//! Model registry for the Kiln control plane
//!
//! - [`ModelCatalog`]: static catalogue of known models, their role aliases
//!   and accelerator footprints
//! - [`Resolution`]: result of resolving a role alias or literal model name
//!
//! Unknown names are never an error here: they resolve to themselves so that
//! callers using literal engine model names keep working.

pub mod catalog;

pub use catalog::{ModelCatalog, ModelCatalogError, ModelCatalogFile, ModelInfo, Resolution};
