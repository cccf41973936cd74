//! Model catalog: role aliases, footprints and residency pinning
//!
//! The [`ModelCatalog`] is the leaf of the control plane. It is built once
//! from the declarative model catalogue and is immutable afterwards, so it is
//! shared behind a plain `Arc` with no locking.
//!
//! # Usage
//!
//! ```rust
//! use kiln_runtime::models::{ModelCatalog, ModelCatalogFile, ModelInfo};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = ModelCatalog::new(ModelCatalogFile {
//!     default_model: "qwen2.5:14b".to_string(),
//!     default_footprint_gb: 4.0,
//!     models: vec![ModelInfo {
//!         name: "qwen2.5:14b".to_string(),
//!         roles: vec!["reasoning".to_string()],
//!         footprint_gb: 10.5,
//!         always_resident: false,
//!         description: None,
//!     }],
//! })?;
//!
//! assert_eq!(catalog.resolve("reasoning"), "qwen2.5:14b");
//! assert_eq!(catalog.resolve("llama3:8b"), "llama3:8b");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::config::{load_catalog, ConfigError};

/// Errors that can occur when building the model catalog
#[derive(Debug, Error)]
pub enum ModelCatalogError {
    #[error("Invalid model configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Alias '{alias}' is claimed by both {first} and {second}")]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },

    #[error("Failed to load model catalogue: {0}")]
    Load(#[from] ConfigError),
}

/// Definition of a single model as declared in the catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Canonical inference-engine name (e.g. `qwen2.5:14b`)
    pub name: String,
    /// Role aliases that resolve to this model
    #[serde(default)]
    pub roles: Vec<String>,
    /// Estimated accelerator memory in GB
    pub footprint_gb: f64,
    /// Never chosen as an eviction candidate
    #[serde(default)]
    pub always_resident: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// On-disk shape of the model catalogue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalogFile {
    /// Model used when a caller names no role
    pub default_model: String,
    /// Footprint assumed for models the catalogue does not know
    #[serde(default = "default_footprint_gb")]
    pub default_footprint_gb: f64,
    pub models: Vec<ModelInfo>,
}

fn default_footprint_gb() -> f64 {
    4.0
}

/// Outcome of resolving a caller-supplied model name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The name was a known alias or canonical model name
    Resolved(String),
    /// Unknown name, passed through as given
    Literal(String),
}

impl Resolution {
    pub fn name(&self) -> &str {
        match self {
            Resolution::Resolved(name) | Resolution::Literal(name) => name,
        }
    }

    pub fn into_name(self) -> String {
        match self {
            Resolution::Resolved(name) | Resolution::Literal(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// Central registry for model definitions and role aliases
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    /// Map of canonical name to model definition
    models: HashMap<String, ModelInfo>,
    /// Map of role alias to canonical name
    aliases: HashMap<String, String>,
    /// Canonical names in declaration order
    order: Vec<String>,
    default_model: String,
    default_footprint_gb: f64,
}

fn is_positive_gb(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

impl ModelCatalog {
    /// Build a catalog from a parsed catalogue file
    ///
    /// # Errors
    ///
    /// Returns [`ModelCatalogError::InvalidConfig`] for duplicate names,
    /// non-positive footprints or an unknown default model, and
    /// [`ModelCatalogError::DuplicateAlias`] when two models claim one alias.
    pub fn new(file: ModelCatalogFile) -> Result<Self, ModelCatalogError> {
        if !is_positive_gb(file.default_footprint_gb) {
            return Err(ModelCatalogError::InvalidConfig {
                reason: "default_footprint_gb must be a finite number > 0".to_string(),
            });
        }

        let mut models = HashMap::new();
        let mut order = Vec::with_capacity(file.models.len());
        for model in file.models {
            if model.name.trim().is_empty() {
                return Err(ModelCatalogError::InvalidConfig {
                    reason: "Model name cannot be empty".to_string(),
                });
            }
            if !is_positive_gb(model.footprint_gb) {
                return Err(ModelCatalogError::InvalidConfig {
                    reason: format!("Model '{}' must have a finite footprint > 0", model.name),
                });
            }
            order.push(model.name.clone());
            if let Some(previous) = models.insert(model.name.clone(), model) {
                return Err(ModelCatalogError::InvalidConfig {
                    reason: format!("Duplicate model name: {}", previous.name),
                });
            }
        }

        let mut aliases: HashMap<String, String> = HashMap::new();
        for name in &order {
            for role in &models[name].roles {
                if let Some(first) = aliases.get(role) {
                    return Err(ModelCatalogError::DuplicateAlias {
                        alias: role.clone(),
                        first: first.clone(),
                        second: name.clone(),
                    });
                }
                // An alias shadowing another model's canonical name would make
                // literal callers silently land on a different model.
                if models.contains_key(role) && role != name {
                    return Err(ModelCatalogError::DuplicateAlias {
                        alias: role.clone(),
                        first: role.clone(),
                        second: name.clone(),
                    });
                }
                aliases.insert(role.clone(), name.clone());
            }
        }

        if !models.contains_key(&file.default_model) {
            return Err(ModelCatalogError::InvalidConfig {
                reason: format!(
                    "Default model '{}' is not defined in the catalogue",
                    file.default_model
                ),
            });
        }

        Ok(Self {
            models,
            aliases,
            order,
            default_model: file.default_model,
            default_footprint_gb: file.default_footprint_gb,
        })
    }

    /// Load and validate the catalogue from a YAML, TOML or JSON file
    pub fn from_path(path: &Path) -> Result<Self, ModelCatalogError> {
        let file: ModelCatalogFile = load_catalog(path)?;
        Self::new(file)
    }

    /// Resolve a role alias or model name, tagging whether it was known.
    pub fn resolve_tagged(&self, name: &str) -> Resolution {
        if let Some(canonical) = self.aliases.get(name) {
            return Resolution::Resolved(canonical.clone());
        }
        if self.models.contains_key(name) {
            return Resolution::Resolved(name.to_string());
        }
        Resolution::Literal(name.to_string())
    }

    /// Resolve a role alias or model name to a canonical engine name.
    ///
    /// Unknown names are returned unchanged.
    pub fn resolve(&self, name: &str) -> String {
        self.resolve_tagged(name).into_name()
    }

    /// Get a model by its canonical name
    ///
    /// Returns `None` if the model is not in the catalog.
    pub fn get_model_info(&self, canonical_name: &str) -> Option<&ModelInfo> {
        self.models.get(canonical_name)
    }

    pub fn get_default_model(&self) -> &str {
        &self.default_model
    }

    /// List all models in declaration order
    pub fn list_models(&self) -> Vec<&ModelInfo> {
        self.order
            .iter()
            .filter_map(|name| self.models.get(name))
            .collect()
    }

    /// Look a model up by role alias or canonical name
    pub fn lookup(&self, role_or_name: &str) -> Option<&ModelInfo> {
        match self.resolve_tagged(role_or_name) {
            Resolution::Resolved(name) => self.models.get(&name),
            Resolution::Literal(_) => None,
        }
    }

    /// Models advertising the given role, in declaration order
    pub fn models_for_role(&self, role: &str) -> Vec<&ModelInfo> {
        self.list_models()
            .into_iter()
            .filter(|model| model.roles.iter().any(|r| r == role))
            .collect()
    }

    pub fn aliases(&self) -> &HashMap<String, String> {
        &self.aliases
    }

    /// Models exempt from eviction
    pub fn always_resident_models(&self) -> Vec<&ModelInfo> {
        self.list_models()
            .into_iter()
            .filter(|model| model.always_resident)
            .collect()
    }

    pub fn is_always_resident(&self, name: &str) -> bool {
        self.lookup(name).map(|m| m.always_resident).unwrap_or(false)
    }

    /// Footprint used for admission control; unknown models get the
    /// catalogue-wide default estimate.
    pub fn footprint_for(&self, name: &str) -> f64 {
        self.lookup(name)
            .map(|m| m.footprint_gb)
            .unwrap_or(self.default_footprint_gb)
    }

    pub fn default_footprint_gb(&self) -> f64 {
        self.default_footprint_gb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str, roles: &[&str], footprint_gb: f64, always_resident: bool) -> ModelInfo {
        ModelInfo {
            name: name.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            footprint_gb,
            always_resident,
            description: None,
        }
    }

    fn create_test_catalog() -> ModelCatalog {
        ModelCatalog::new(ModelCatalogFile {
            default_model: "qwen2.5:14b".to_string(),
            default_footprint_gb: 5.0,
            models: vec![
                model("qwen2.5:14b", &["reasoning"], 10.5, false),
                model("qwen2.5-coder:32b", &["code", "heavy"], 20.0, false),
                model("nomic-embed-text", &["embeddings"], 0.6, true),
            ],
        })
        .unwrap()
    }

    #[test]
    fn test_resolve_alias_is_stable() {
        let catalog = create_test_catalog();
        for _ in 0..3 {
            assert_eq!(catalog.resolve("reasoning"), "qwen2.5:14b");
            assert_eq!(catalog.resolve("heavy"), "qwen2.5-coder:32b");
            assert_eq!(catalog.resolve("code"), "qwen2.5-coder:32b");
        }
    }

    #[test]
    fn test_resolve_canonical_name() {
        let catalog = create_test_catalog();
        assert_eq!(
            catalog.resolve_tagged("nomic-embed-text"),
            Resolution::Resolved("nomic-embed-text".to_string())
        );
    }

    #[test]
    fn test_unknown_names_pass_through() {
        let catalog = create_test_catalog();
        for name in ["llama3.1:8b", "", "REASONING", "mistral:latest"] {
            assert_eq!(catalog.resolve(name), name);
            assert!(!catalog.resolve_tagged(name).is_known());
        }
    }

    #[test]
    fn test_get_model_info() {
        let catalog = create_test_catalog();
        let info = catalog.get_model_info("nomic-embed-text").unwrap();
        assert!(info.always_resident);
        assert_eq!(info.roles, vec!["embeddings".to_string()]);
        assert!(catalog.get_model_info("embeddings").is_none());
        assert!(catalog.get_model_info("unknown").is_none());
    }

    #[test]
    fn test_default_model_and_footprints() {
        let catalog = create_test_catalog();
        assert_eq!(catalog.get_default_model(), "qwen2.5:14b");
        assert_eq!(catalog.footprint_for("code"), 20.0);
        assert_eq!(catalog.footprint_for("phi3:mini"), 5.0);
        assert!(catalog.is_always_resident("embeddings"));
        assert!(!catalog.is_always_resident("reasoning"));
        assert_eq!(catalog.always_resident_models().len(), 1);
        assert_eq!(catalog.models_for_role("heavy")[0].name, "qwen2.5-coder:32b");
        assert!(catalog.models_for_role("vision").is_empty());
    }

    #[test]
    fn test_list_models_keeps_declaration_order() {
        let catalog = create_test_catalog();
        let names: Vec<&str> = catalog.list_models().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["qwen2.5:14b", "qwen2.5-coder:32b", "nomic-embed-text"]
        );
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let result = ModelCatalog::new(ModelCatalogFile {
            default_model: "a".to_string(),
            default_footprint_gb: 4.0,
            models: vec![
                model("a", &["reasoning"], 1.0, false),
                model("b", &["reasoning"], 1.0, false),
            ],
        });
        assert!(matches!(
            result,
            Err(ModelCatalogError::DuplicateAlias { .. })
        ));
    }

    #[test]
    fn test_alias_shadowing_model_name_rejected() {
        let result = ModelCatalog::new(ModelCatalogFile {
            default_model: "a".to_string(),
            default_footprint_gb: 4.0,
            models: vec![model("a", &[], 1.0, false), model("b", &["a"], 1.0, false)],
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_default_model_rejected() {
        let result = ModelCatalog::new(ModelCatalogFile {
            default_model: "missing".to_string(),
            default_footprint_gb: 4.0,
            models: vec![model("a", &[], 1.0, false)],
        });
        assert!(matches!(result, Err(ModelCatalogError::InvalidConfig { .. })));
    }

    #[test]
    fn test_zero_footprint_rejected() {
        let result = ModelCatalog::new(ModelCatalogFile {
            default_model: "a".to_string(),
            default_footprint_gb: 4.0,
            models: vec![model("a", &[], 0.0, false)],
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_non_finite_footprints_rejected() {
        for footprint in [f64::NAN, f64::INFINITY] {
            let result = ModelCatalog::new(ModelCatalogFile {
                default_model: "a".to_string(),
                default_footprint_gb: 4.0,
                models: vec![model("a", &[], footprint, false)],
            });
            assert!(matches!(result, Err(ModelCatalogError::InvalidConfig { .. })));
        }

        let result = ModelCatalog::new(ModelCatalogFile {
            default_model: "a".to_string(),
            default_footprint_gb: f64::NAN,
            models: vec![model("a", &[], 2.0, false)],
        });
        assert!(matches!(result, Err(ModelCatalogError::InvalidConfig { .. })));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.yaml");
        std::fs::write(
            &path,
            r#"
default_model: llama3.1:8b
models:
  - name: llama3.1:8b
    roles: [reasoning, chat]
    footprint_gb: 6.2
  - name: bge-m3
    roles: [embeddings]
    footprint_gb: 1.2
    always_resident: true
"#,
        )
        .unwrap();

        let catalog = ModelCatalog::from_path(&path).unwrap();
        assert_eq!(catalog.resolve("chat"), "llama3.1:8b");
        assert_eq!(catalog.default_footprint_gb(), 4.0);
        assert!(catalog.is_always_resident("bge-m3"));
    }
}
