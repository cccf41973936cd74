//! Configuration management for the Kiln control plane
//!
//! The main `kiln.toml` file carries the tunables for every component. The
//! model and service catalogues are separate declarative files (YAML, TOML or
//! JSON, chosen by extension) that are loaded once at startup and never
//! modified at runtime. `KILN_*` environment variables override file values.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KilnConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub accelerator: AcceleratorConfig,
    pub routing: RoutingConfig,
    pub cloud: CloudConfig,
    pub boot: BootConfig,
    pub health: HealthConfig,
    pub catalogs: CatalogPaths,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub enable_tracing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8700,
            enable_cors: true,
            enable_tracing: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Local inference engine (Ollama-compatible) connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// How long the engine keeps a model loaded after a request
    pub keep_alive: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            request_timeout: Duration::from_secs(300),
            keep_alive: "30m".to_string(),
        }
    }
}

/// Accelerator memory budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    pub total_capacity_gb: f64,
    /// Overhead the scheduler never allocates against
    pub reserved_headroom_gb: f64,
    /// Load always-resident models once boot has finished
    pub preload_always_resident: bool,
    pub telemetry: TelemetryConfig,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            total_capacity_gb: 24.0,
            reserved_headroom_gb: 1.5,
            preload_always_resident: true,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AcceleratorConfig {
    /// Capacity available to models once headroom is set aside.
    pub fn usable_capacity_gb(&self) -> f64 {
        (self.total_capacity_gb - self.reserved_headroom_gb).max(0.0)
    }
}

/// Live accelerator telemetry source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub command: String,
    pub device_index: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "nvidia-smi".to_string(),
            device_index: 0,
            timeout: Duration::from_secs(3),
        }
    }
}

/// Inference router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Upper bound on a single local attempt before falling through to cloud
    #[serde(with = "humantime_serde")]
    pub local_timeout: Duration,
    pub cloud_fallback: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            local_timeout: Duration::from_secs(120),
            cloud_fallback: true,
        }
    }
}

/// Cloud fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Providers in preference order
    pub providers: Vec<ProviderConfig>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Optional JSONL file the cost ledger is persisted to
    pub ledger_path: Option<PathBuf>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            request_timeout: Duration::from_secs(120),
            ledger_path: None,
        }
    }
}

/// Wire protocol spoken by a cloud provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions (also OpenRouter, Groq and other compatible APIs)
    OpenAi,
    Anthropic,
}

/// A single cloud provider entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub pricing: Pricing,
}

impl ProviderConfig {
    /// Resolve credentials, preferring an inline key over the environment.
    pub fn credentials(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Some(key.clone());
        }
        self.api_key_env
            .as_ref()
            .and_then(|var| env::var(var).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn base_url(&self) -> String {
        let url = match (&self.base_url, self.kind) {
            (Some(url), _) => url.as_str(),
            (None, ProviderKind::OpenAi) => "https://api.openai.com/v1",
            (None, ProviderKind::Anthropic) => "https://api.anthropic.com/v1",
        };
        url.trim_end_matches('/').to_string()
    }
}

/// USD per million tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default)]
    pub input_per_million: f64,
    #[serde(default)]
    pub output_per_million: f64,
}

impl Pricing {
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 * self.input_per_million
            + completion_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

/// Boot sequencer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    #[serde(with = "humantime_serde")]
    pub phase_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            phase_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Health guardian configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    pub restart: RestartPolicy,
    /// Failed probes of a freshly launched service are not counted until
    /// this long after launch
    #[serde(with = "humantime_serde")]
    pub startup_grace: Duration,
    /// Number of guardian observations kept for `/api/logs`
    pub log_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(5),
            restart: RestartPolicy::default(),
            startup_grace: Duration::from_secs(120),
            log_capacity: 500,
        }
    }
}

/// Bounded restart policy applied by the health guardian
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Consecutive failed probes after which a service is marked failed
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub backoff: BackoffStrategy,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
            backoff: BackoffStrategy::Fixed,
        }
    }
}

impl RestartPolicy {
    /// Delay to wait after the `attempt`-th restart (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match &self.backoff {
            BackoffStrategy::Fixed => self.retry_delay,
            BackoffStrategy::Exponential { factor, max_delay } => {
                let exponent = attempt.saturating_sub(1).min(32) as i32;
                let scaled = self.retry_delay.as_secs_f64() * factor.max(1.0).powi(exponent);
                Duration::from_secs_f64(scaled.min(max_delay.as_secs_f64()))
            }
        }
    }

    /// Apply a per-service override on top of this policy.
    pub fn with_override(&self, overrides: Option<&RestartOverride>) -> RestartPolicy {
        let Some(o) = overrides else {
            return self.clone();
        };
        RestartPolicy {
            max_retries: o.max_retries.unwrap_or(self.max_retries),
            retry_delay: o.retry_delay.unwrap_or(self.retry_delay),
            backoff: o.backoff.clone().unwrap_or_else(|| self.backoff.clone()),
        }
    }
}

/// Delay growth between restart attempts
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Exponential {
        factor: f64,
        #[serde(with = "humantime_serde")]
        max_delay: Duration,
    },
}

/// Per-service restart policy override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartOverride {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub retry_delay: Option<Duration>,
    #[serde(default)]
    pub backoff: Option<BackoffStrategy>,
}

/// Locations of the declarative catalogues
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogPaths {
    pub models: PathBuf,
    pub services: PathBuf,
}

impl Default for CatalogPaths {
    fn default() -> Self {
        Self {
            models: PathBuf::from("config/models.yaml"),
            services: PathBuf::from("config/services.toml"),
        }
    }
}

impl KilnConfig {
    /// Load the configuration file (if present), apply environment overrides
    /// and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    ///
    /// Relative catalogue and ledger paths are resolved against the
    /// directory holding the configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: format!("{}: {}", path.display(), e),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        if let Some(dir) = path.parent() {
            config.catalogs.models = resolve_relative(dir, &config.catalogs.models);
            config.catalogs.services = resolve_relative(dir, &config.catalogs.services);
            config.cloud.ledger_path = config
                .cloud
                .ledger_path
                .map(|ledger| resolve_relative(dir, &ledger));
        }

        Ok(config)
    }

    /// Apply `KILN_*` overrides using the supplied variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("KILN_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("KILN_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "KILN_PORT".to_string(),
                reason: "Invalid port number".to_string(),
            })?;
        }

        if let Some(url) = lookup("KILN_ENGINE_URL") {
            self.engine.base_url = url;
        }

        if let Some(level) = lookup("KILN_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("KILN_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                "compact" => LogFormat::Compact,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "KILN_LOG_FORMAT".to_string(),
                        reason: format!("Unknown log format '{}'", other),
                    })
                }
            };
        }

        if let Some(vram) = lookup("KILN_VRAM_GB") {
            self.accelerator.total_capacity_gb =
                vram.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "KILN_VRAM_GB".to_string(),
                    reason: "Expected a number of gigabytes".to_string(),
                })?;
        }

        if let Some(models) = lookup("KILN_MODELS") {
            self.catalogs.models = PathBuf::from(models);
        }

        if let Some(services) = lookup("KILN_SERVICES") {
            self.catalogs.services = PathBuf::from(services);
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "server.port".to_string(),
                reason: "Port cannot be 0".to_string(),
            });
        }

        let level = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                reason: format!("Must be one of: {}", valid_levels.join(", ")),
            });
        }

        if self.engine.base_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "engine.base_url".to_string(),
            });
        }

        let total_gb = self.accelerator.total_capacity_gb;
        if !total_gb.is_finite() || total_gb <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "accelerator.total_capacity_gb".to_string(),
                reason: "Capacity must be a finite number > 0".to_string(),
            });
        }

        let headroom_gb = self.accelerator.reserved_headroom_gb;
        if !headroom_gb.is_finite() || headroom_gb < 0.0 || headroom_gb >= total_gb
        {
            return Err(ConfigError::InvalidValue {
                key: "accelerator.reserved_headroom_gb".to_string(),
                reason: "Headroom must be >= 0 and below total capacity".to_string(),
            });
        }

        if self.routing.local_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "routing.local_timeout".to_string(),
                reason: "Timeout must be > 0".to_string(),
            });
        }

        let mut names = std::collections::HashSet::new();
        for provider in &self.cloud.providers {
            if !names.insert(provider.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "cloud.providers".to_string(),
                    reason: format!("Duplicate provider name: {}", provider.name),
                });
            }
            if provider.model.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("cloud.providers.{}.model", provider.name),
                    reason: "Model cannot be empty".to_string(),
                });
            }
        }

        if self.health.interval.is_zero() || self.boot.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "health.interval".to_string(),
                reason: "Polling intervals must be > 0".to_string(),
            });
        }

        if self.health.restart.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "health.restart.max_retries".to_string(),
                reason: "At least one retry is required".to_string(),
            });
        }

        if self.health.log_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "health.log_capacity".to_string(),
                reason: "Log buffer capacity must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Parse a declarative catalogue file, choosing the format by extension.
pub fn load_catalog<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        message: format!("{}: {}", path.display(), e),
    })?;

    let parse_error = |e: String| ConfigError::ParseError {
        message: format!("{}: {}", path.display(), e),
    };

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))
        }
        Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
        other => Err(ConfigError::InvalidValue {
            key: path.display().to_string(),
            reason: format!("Unsupported catalogue format: {}", other.unwrap_or("<none>")),
        }),
    }
}
