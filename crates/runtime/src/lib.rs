//! Kiln control plane runtime
//!
//! Decides which language model runs where on a single host: how much
//! accelerator memory each model may take, whether a request is served by
//! the local engine or a cloud provider, and how the background services the
//! host depends on are booted, watched and restarted.
//!
//! All mutable state is owned by one [`ControlPlane`] value that is handed to
//! the HTTP layer and the CLI; there are no process-wide globals.

pub mod cloud;
pub mod config;
pub mod engine;
pub mod logging;
pub mod models;
pub mod routing;
pub mod scheduler;
pub mod services;
pub mod types;

#[cfg(feature = "http-api")]
pub mod api;

pub use cloud::{CloudFallbackClient, CostLedger};
pub use config::KilnConfig;
pub use engine::{LocalEngine, OllamaEngine};
pub use models::ModelCatalog;
pub use routing::{InferenceRouter, RouteOptions};
pub use scheduler::AcceleratorScheduler;
pub use services::{BootSequencer, HealthGuardian, ServiceGraph};
pub use types::*;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scheduler::{GpuTelemetry, NvidiaSmiTelemetry};
use services::{
    BootReport, CommandLauncher, GuardianHandle, HealthProbe, LogBuffer, NetworkProbe,
    ServiceLauncher, ServicesFile,
};

/// Every control-plane component, wired together
pub struct ControlPlane {
    config: KilnConfig,
    catalog: Arc<ModelCatalog>,
    engine: Arc<dyn LocalEngine>,
    scheduler: Arc<AcceleratorScheduler>,
    cloud: Arc<CloudFallbackClient>,
    router: Arc<InferenceRouter>,
    services: Arc<ServiceGraph>,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Assembles a [`ControlPlane`], with each external seam replaceable
pub struct ControlPlaneBuilder {
    config: KilnConfig,
    catalog: ModelCatalog,
    services: ServicesFile,
    engine: Option<Arc<dyn LocalEngine>>,
    telemetry: Option<Arc<dyn GpuTelemetry>>,
    probe: Option<Arc<dyn HealthProbe>>,
    launcher: Option<Arc<dyn ServiceLauncher>>,
    ledger: Option<Arc<CostLedger>>,
}

impl ControlPlaneBuilder {
    pub fn engine(mut self, engine: Arc<dyn LocalEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn GpuTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn ServiceLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn build(self) -> Result<ControlPlane, KilnError> {
        let config = self.config;
        let catalog = Arc::new(self.catalog);

        let engine: Arc<dyn LocalEngine> = match self.engine {
            Some(engine) => engine,
            None => Arc::new(OllamaEngine::new(&config.engine)?),
        };
        let telemetry: Arc<dyn GpuTelemetry> = self.telemetry.unwrap_or_else(|| {
            Arc::new(NvidiaSmiTelemetry::new(config.accelerator.telemetry.clone()))
        });
        let probe: Arc<dyn HealthProbe> = self
            .probe
            .unwrap_or_else(|| Arc::new(NetworkProbe::new(config.health.probe_timeout)));
        let launcher: Arc<dyn ServiceLauncher> = self
            .launcher
            .unwrap_or_else(|| Arc::new(CommandLauncher::new()));
        let ledger = match self.ledger {
            Some(ledger) => ledger,
            None => match &config.cloud.ledger_path {
                Some(path) => Arc::new(CostLedger::open(path)?),
                None => Arc::new(CostLedger::in_memory()),
            },
        };

        let scheduler = Arc::new(AcceleratorScheduler::new(
            config.accelerator.clone(),
            catalog.clone(),
            engine.clone(),
            telemetry,
        ));
        let cloud = Arc::new(CloudFallbackClient::new(&config.cloud, ledger)?);
        let router = Arc::new(InferenceRouter::new(
            config.routing.clone(),
            catalog.clone(),
            scheduler.clone(),
            engine.clone(),
            cloud.clone(),
        ));
        let services = Arc::new(ServiceGraph::new(
            self.services,
            probe,
            launcher,
            Arc::new(LogBuffer::new(config.health.log_capacity)),
        )?);

        tracing::info!(
            "Control plane ready: {} models, {} services, {} cloud providers, {:.1} GB usable",
            catalog.list_models().len(),
            services.descriptors().count(),
            cloud.provider_names().len(),
            config.accelerator.usable_capacity_gb()
        );

        Ok(ControlPlane {
            config,
            catalog,
            engine,
            scheduler,
            cloud,
            router,
            services,
            started: Instant::now(),
            started_at: Utc::now(),
        })
    }
}

impl ControlPlane {
    pub fn builder(
        config: KilnConfig,
        catalog: ModelCatalog,
        services: ServicesFile,
    ) -> ControlPlaneBuilder {
        ControlPlaneBuilder {
            config,
            catalog,
            services,
            engine: None,
            telemetry: None,
            probe: None,
            launcher: None,
            ledger: None,
        }
    }

    /// Load both catalogues named by the configuration and wire the
    /// production engine, telemetry, probe and launcher.
    pub fn from_config(config: KilnConfig) -> Result<Self, KilnError> {
        let catalog = ModelCatalog::from_path(&config.catalogs.models)?;
        let services: ServicesFile = config::load_catalog(&config.catalogs.services)?;
        Self::builder(config, catalog, services).build()
    }

    /// Run the boot sequence, then warm always-resident models if enabled.
    pub async fn boot(&self) -> Result<BootReport, KilnError> {
        let report = BootSequencer::new(self.services.clone(), self.config.boot.clone())
            .run()
            .await?;

        if self.config.accelerator.preload_always_resident {
            let loaded = self.scheduler.preload_always_resident().await;
            if !loaded.is_empty() {
                tracing::info!("Preloaded always-resident models: {:?}", loaded);
            }
        }
        Ok(report)
    }

    /// Spawn the health guardian for the lifetime of the returned handle
    pub fn start_guardian(&self) -> GuardianHandle {
        Arc::new(HealthGuardian::new(
            self.services.clone(),
            self.config.health.clone(),
        ))
        .start()
    }

    /// Stop processes started on behalf of services
    pub async fn shutdown(&self) {
        self.services.launcher().shutdown().await;
        self.cloud.ledger().flush().await;
    }

    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn engine(&self) -> &Arc<dyn LocalEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Arc<AcceleratorScheduler> {
        &self.scheduler
    }

    pub fn cloud(&self) -> &Arc<CloudFallbackClient> {
        &self.cloud
    }

    pub fn router(&self) -> &Arc<InferenceRouter> {
        &self.router
    }

    pub fn services(&self) -> &Arc<ServiceGraph> {
        &self.services
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
