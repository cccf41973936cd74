//! Residency tracking, LRU eviction and capacity reservations

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::telemetry::GpuTelemetry;
use super::{AcceleratorStats, SchedulerError, StatsSource};
use crate::config::AcceleratorConfig;
use crate::engine::LocalEngine;
use crate::models::ModelCatalog;

/// Tolerance for floating point budget comparisons, in GB
const BUDGET_EPSILON_GB: f64 = 1e-6;

/// A model occupying (or reserved to occupy) accelerator memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidentEntry {
    pub model: String,
    pub footprint_gb: f64,
    pub always_resident: bool,
    /// Capacity reserved by an in-flight request that has not confirmed a load
    pub pending: bool,
    /// Reservations currently serving requests on this model; never evicted while non-zero
    #[serde(default)]
    pub in_use: u32,
    pub loaded_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// Logical recency; strictly increasing across touches
    #[serde(skip)]
    last_used_seq: u64,
    #[serde(skip)]
    reservation_id: u64,
}

#[derive(Debug, Default)]
struct Residency {
    entries: HashMap<String, ResidentEntry>,
    clock: u64,
}

impl Residency {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn used_gb(&self) -> f64 {
        self.entries.values().map(|e| e.footprint_gb).sum()
    }

    fn free_gb(&self, usable_gb: f64) -> f64 {
        (usable_gb - self.used_gb()).max(0.0)
    }

    fn touch(&mut self, model: &str) -> bool {
        let seq = self.tick();
        match self.entries.get_mut(model) {
            Some(entry) => {
                entry.last_used_seq = seq;
                entry.last_used_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Choose victims, oldest first, so that `required_gb` fits.
    ///
    /// Returns an error without selecting anything when even evicting every
    /// candidate would not free enough memory.
    fn plan_evictions(
        &self,
        required_gb: f64,
        usable_gb: f64,
    ) -> Result<Vec<String>, SchedulerError> {
        let mut free_gb = self.free_gb(usable_gb);
        if free_gb + BUDGET_EPSILON_GB >= required_gb {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<&ResidentEntry> = self
            .entries
            .values()
            .filter(|e| !e.always_resident && !e.pending && e.in_use == 0)
            .collect();
        candidates.sort_by_key(|e| e.last_used_seq);

        let reclaimable_gb: f64 = candidates.iter().map(|e| e.footprint_gb).sum();
        if free_gb + reclaimable_gb + BUDGET_EPSILON_GB < required_gb {
            return Err(SchedulerError::CapacityExhausted {
                required_gb,
                free_gb,
                reclaimable_gb,
            });
        }

        let mut victims = Vec::new();
        for entry in candidates {
            if free_gb + BUDGET_EPSILON_GB >= required_gb {
                break;
            }
            free_gb += entry.footprint_gb;
            victims.push(entry.model.clone());
        }
        Ok(victims)
    }

    fn remove_all(&mut self, victims: &[String]) {
        for model in victims {
            self.entries.remove(model);
        }
    }
}

/// Admission control for a single accelerator
pub struct AcceleratorScheduler {
    config: AcceleratorConfig,
    catalog: Arc<ModelCatalog>,
    engine: Arc<dyn LocalEngine>,
    telemetry: Arc<dyn GpuTelemetry>,
    state: Arc<Mutex<Residency>>,
}

impl AcceleratorScheduler {
    pub fn new(
        config: AcceleratorConfig,
        catalog: Arc<ModelCatalog>,
        engine: Arc<dyn LocalEngine>,
        telemetry: Arc<dyn GpuTelemetry>,
    ) -> Self {
        Self {
            config,
            catalog,
            engine,
            telemetry,
            state: Arc::new(Mutex::new(Residency::default())),
        }
    }

    /// Memory the scheduler may allocate once headroom is set aside
    pub fn usable_capacity_gb(&self) -> f64 {
        self.config.usable_capacity_gb()
    }

    /// Current free budget derived from the residency map
    pub fn free_budget_gb(&self) -> f64 {
        self.state.lock().free_gb(self.usable_capacity_gb())
    }

    /// Accelerator memory figures; never fails.
    ///
    /// Live telemetry is preferred. When it is unavailable the figures are
    /// estimated from admitted footprints and the reason is reported.
    pub async fn get_stats(&self) -> AcceleratorStats {
        let reading = self.telemetry.read().await;

        let (managed_used_gb, resident_models) = {
            let state = self.state.lock();
            (state.used_gb(), state.entries.len())
        };
        let budget_free_gb = (self.usable_capacity_gb() - managed_used_gb).max(0.0);

        match reading {
            Ok(reading) => AcceleratorStats {
                capacity_gb: reading.total_gb,
                used_gb: reading.used_gb,
                free_gb: (reading.total_gb - reading.used_gb).max(0.0),
                headroom_gb: self.config.reserved_headroom_gb,
                managed_used_gb,
                budget_free_gb,
                resident_models,
                source: StatsSource::Telemetry,
                device: Some(reading.name),
                telemetry_error: None,
            },
            Err(e) => {
                tracing::debug!("Accelerator telemetry unavailable, using estimate: {}", e);
                AcceleratorStats {
                    capacity_gb: self.config.total_capacity_gb,
                    used_gb: managed_used_gb,
                    free_gb: budget_free_gb,
                    headroom_gb: self.config.reserved_headroom_gb,
                    managed_used_gb,
                    budget_free_gb,
                    resident_models,
                    source: StatsSource::Estimate,
                    device: None,
                    telemetry_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Make sure `required_gb` of budget is free, evicting LRU models if needed.
    ///
    /// Returns the evicted model names; empty when enough memory was already
    /// free.
    pub async fn ensure_capacity(&self, required_gb: f64) -> Result<Vec<String>, SchedulerError> {
        validate_request(required_gb)?;

        let victims = {
            let mut state = self.state.lock();
            let victims = state.plan_evictions(required_gb, self.usable_capacity_gb())?;
            state.remove_all(&victims);
            victims
        };

        self.unload_all(&victims).await;
        Ok(victims)
    }

    /// Reserve capacity for `model` ahead of a local inference call.
    ///
    /// A resident model is touched and pinned for the life of the
    /// reservation. Otherwise room is made and a pending entry is inserted
    /// atomically with the eviction decision. The reservation must be
    /// [confirmed](Reservation::confirm) once the model has served a request;
    /// dropping it unconfirmed releases the capacity.
    pub async fn acquire(&self, model: &str) -> Result<Reservation, SchedulerError> {
        let footprint_gb = self.catalog.footprint_for(model);
        validate_request(footprint_gb)?;
        let always_resident = self.catalog.is_always_resident(model);

        let (victims, reservation_id) = {
            let mut state = self.state.lock();
            if state.touch(model) {
                if let Some(entry) = state.entries.get_mut(model) {
                    entry.in_use += 1;
                    let generation = entry.reservation_id;
                    return Ok(Reservation::new(
                        self.state.clone(),
                        model,
                        generation,
                        false,
                        Vec::new(),
                    ));
                }
            }

            let victims = state.plan_evictions(footprint_gb, self.usable_capacity_gb())?;
            state.remove_all(&victims);

            let reservation_id = state.tick();
            let now = Utc::now();
            state.entries.insert(
                model.to_string(),
                ResidentEntry {
                    model: model.to_string(),
                    footprint_gb,
                    always_resident,
                    pending: true,
                    in_use: 1,
                    loaded_at: now,
                    last_used_at: now,
                    last_used_seq: reservation_id,
                    reservation_id,
                },
            );
            (victims, reservation_id)
        };

        if !victims.is_empty() {
            tracing::info!(
                "Evicted {:?} to admit {} ({:.1} GB)",
                victims,
                model,
                footprint_gb
            );
        }
        self.unload_all(&victims).await;

        Ok(Reservation::new(
            self.state.clone(),
            model,
            reservation_id,
            true,
            victims,
        ))
    }

    /// Record a model as resident without going through the engine.
    pub async fn mark_resident(&self, model: &str) -> Result<Vec<String>, SchedulerError> {
        let reservation = self.acquire(model).await?;
        let evicted = reservation.evicted().to_vec();
        reservation.confirm();
        Ok(evicted)
    }

    /// Refresh a resident model's recency. Returns false if it is not resident.
    pub fn touch(&self, model: &str) -> bool {
        self.state.lock().touch(model)
    }

    pub fn is_resident(&self, model: &str) -> bool {
        self.state
            .lock()
            .entries
            .get(model)
            .map(|e| !e.pending)
            .unwrap_or(false)
    }

    /// Evict a specific model. Returns false if it was not resident or is
    /// still serving a request.
    pub async fn evict(&self, model: &str) -> Result<bool, SchedulerError> {
        let removed = {
            let mut state = self.state.lock();
            match state.entries.get(model) {
                Some(entry) if entry.always_resident => {
                    return Err(SchedulerError::AlwaysResident {
                        model: model.to_string(),
                    })
                }
                Some(entry) if entry.pending || entry.in_use > 0 => false,
                Some(_) => state.entries.remove(model).is_some(),
                None => false,
            }
        };

        if removed {
            self.unload_all(&[model.to_string()]).await;
        }
        Ok(removed)
    }

    /// Residency map, most recently used first
    pub fn residency(&self) -> Vec<ResidentEntry> {
        let state = self.state.lock();
        let mut entries: Vec<ResidentEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.last_used_seq.cmp(&a.last_used_seq));
        entries
    }

    /// Load every always-resident model so pinned models are warm before
    /// the first request. Failures are logged and skipped.
    pub async fn preload_always_resident(&self) -> Vec<String> {
        let pinned: Vec<String> = self
            .catalog
            .always_resident_models()
            .into_iter()
            .map(|m| m.name.clone())
            .collect();

        let mut loaded = Vec::new();
        for model in pinned {
            let reservation = match self.acquire(&model).await {
                Ok(reservation) => reservation,
                Err(e) => {
                    tracing::warn!("Cannot preload pinned model {}: {}", model, e);
                    continue;
                }
            };

            match self.engine.load(&model).await {
                Ok(()) => {
                    reservation.confirm();
                    loaded.push(model);
                }
                Err(e) => tracing::warn!("Failed to preload pinned model {}: {}", model, e),
            }
        }
        loaded
    }

    async fn unload_all(&self, victims: &[String]) {
        for model in victims {
            if let Err(e) = self.engine.unload(model).await {
                // The engine frees memory on its own keep-alive timer, so a
                // failed unload only delays reclamation.
                tracing::warn!("Failed to unload evicted model {}: {}", model, e);
            }
        }
    }
}

fn validate_request(required_gb: f64) -> Result<(), SchedulerError> {
    if !required_gb.is_finite() || required_gb < 0.0 {
        return Err(SchedulerError::InvalidRequest {
            reason: format!("required capacity must be a non-negative number, got {}", required_gb),
        });
    }
    Ok(())
}

/// Capacity held on behalf of one request
///
/// The model is pinned against eviction until the reservation is confirmed
/// or dropped. Dropping an unconfirmed reservation of a model that never
/// finished loading removes the pending entry once no other request holds
/// it, so a request that fails or is cancelled never keeps memory booked.
#[must_use = "dropping a reservation releases the capacity it holds"]
pub struct Reservation {
    state: Arc<Mutex<Residency>>,
    model: String,
    /// Identity of the residency entry this reservation pins
    generation: u64,
    /// Set when this reservation inserted the pending entry
    owner: bool,
    released: bool,
    evicted: Vec<String>,
}

impl Reservation {
    fn new(
        state: Arc<Mutex<Residency>>,
        model: &str,
        generation: u64,
        owner: bool,
        evicted: Vec<String>,
    ) -> Self {
        Self {
            state,
            model: model.to_string(),
            generation,
            owner,
            released: false,
            evicted,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Models evicted to make room for this reservation
    pub fn evicted(&self) -> &[String] {
        &self.evicted
    }

    /// True when the model was already resident or being loaded by another request
    pub fn was_resident(&self) -> bool {
        !self.owner
    }

    /// Mark the model as loaded and keep it resident.
    pub fn confirm(mut self) {
        self.release(true);
    }

    fn release(&mut self, loaded: bool) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.state.lock();
        let seq = state.tick();
        let remove = match state.entries.get_mut(&self.model) {
            Some(entry) if entry.reservation_id == self.generation => {
                entry.in_use = entry.in_use.saturating_sub(1);
                if loaded {
                    entry.pending = false;
                    entry.last_used_seq = seq;
                    entry.last_used_at = Utc::now();
                    false
                } else {
                    entry.pending && entry.in_use == 0
                }
            }
            _ => false,
        };
        if remove {
            state.entries.remove(&self.model);
            tracing::debug!("Released unconfirmed reservation for {}", self.model);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release(false);
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("model", &self.model)
            .field("owner", &self.owner)
            .field("released", &self.released)
            .field("evicted", &self.evicted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::engine::{EngineChatRequest, EngineChatResponse, EngineError};
    use crate::models::{ModelCatalogFile, ModelInfo};
    use crate::scheduler::telemetry::{DisabledTelemetry, GpuReading, TelemetryError};
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingEngine {
        unloaded: Mutex<Vec<String>>,
        loaded: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LocalEngine for RecordingEngine {
        async fn chat(
            &self,
            _request: &EngineChatRequest,
        ) -> Result<EngineChatResponse, EngineError> {
            Err(EngineError::Timeout)
        }

        async fn load(&self, model: &str) -> Result<(), EngineError> {
            self.loaded.lock().push(model.to_string());
            Ok(())
        }

        async fn unload(&self, model: &str) -> Result<(), EngineError> {
            self.unloaded.lock().push(model.to_string());
            Ok(())
        }

        async fn list_models(&self) -> Result<serde_json::Value, EngineError> {
            Ok(serde_json::json!({ "models": [] }))
        }

        fn endpoint(&self) -> &str {
            "memory://recording"
        }
    }

    struct FixedTelemetry;

    #[async_trait]
    impl GpuTelemetry for FixedTelemetry {
        async fn read(&self) -> Result<GpuReading, TelemetryError> {
            Ok(GpuReading {
                name: "Test GPU".to_string(),
                total_gb: 24.0,
                used_gb: 9.5,
            })
        }
    }

    fn model(name: &str, footprint_gb: f64, always_resident: bool) -> ModelInfo {
        ModelInfo {
            name: name.to_string(),
            roles: Vec::new(),
            footprint_gb,
            always_resident,
            description: None,
        }
    }

    /// Usable capacity is `total_gb - 1.0`.
    fn scheduler_with(total_gb: f64) -> (AcceleratorScheduler, Arc<RecordingEngine>) {
        let catalog = ModelCatalog::new(ModelCatalogFile {
            default_model: "big".to_string(),
            default_footprint_gb: 3.0,
            models: vec![
                model("big", 10.0, false),
                model("medium", 8.0, false),
                model("embed", 2.0, true),
            ],
        })
        .unwrap();

        let engine = Arc::new(RecordingEngine::default());
        let config = AcceleratorConfig {
            total_capacity_gb: total_gb,
            reserved_headroom_gb: 1.0,
            preload_always_resident: true,
            telemetry: TelemetryConfig::default(),
        };
        let scheduler = AcceleratorScheduler::new(
            config,
            Arc::new(catalog),
            engine.clone(),
            Arc::new(DisabledTelemetry),
        );
        (scheduler, engine)
    }

    #[tokio::test]
    async fn test_ensure_capacity_is_noop_when_budget_is_free() {
        let (scheduler, engine) = scheduler_with(21.0);
        scheduler.mark_resident("embed").await.unwrap();
        scheduler.mark_resident("medium").await.unwrap();

        for _ in 0..3 {
            let evicted = scheduler.ensure_capacity(5.0).await.unwrap();
            assert!(evicted.is_empty());
        }
        assert_eq!(scheduler.residency().len(), 2);
        assert!(engine.unloaded.lock().is_empty());
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used_first() {
        let (scheduler, engine) = scheduler_with(21.0);
        scheduler.mark_resident("big").await.unwrap();
        scheduler.mark_resident("medium").await.unwrap();
        assert!(scheduler.touch("big"));

        let evicted = scheduler.ensure_capacity(5.0).await.unwrap();
        assert_eq!(evicted, vec!["medium".to_string()]);
        assert_eq!(*engine.unloaded.lock(), vec!["medium".to_string()]);
        assert!(scheduler.is_resident("big"));
        assert!(!scheduler.is_resident("medium"));
    }

    #[tokio::test]
    async fn test_always_resident_model_is_never_evicted() {
        // 12 GB usable: embed (2, pinned) + medium (8) leaves 2 free
        let (scheduler, engine) = scheduler_with(13.0);
        scheduler.mark_resident("embed").await.unwrap();
        scheduler.mark_resident("medium").await.unwrap();

        // Only evicting the pinned model as well could satisfy 11 GB
        let err = scheduler.ensure_capacity(11.0).await.unwrap_err();
        assert!(matches!(err, SchedulerError::CapacityExhausted { .. }));
        assert!(scheduler.is_resident("embed"));
        assert!(scheduler.is_resident("medium"));
        assert!(engine.unloaded.lock().is_empty());

        let evicted = scheduler.ensure_capacity(9.0).await.unwrap();
        assert_eq!(evicted, vec!["medium".to_string()]);
        assert!(scheduler.is_resident("embed"));
    }

    #[tokio::test]
    async fn test_pinned_model_refuses_manual_eviction() {
        let (scheduler, _engine) = scheduler_with(21.0);
        scheduler.mark_resident("embed").await.unwrap();
        assert!(matches!(
            scheduler.evict("embed").await,
            Err(SchedulerError::AlwaysResident { .. })
        ));
        assert!(!scheduler.evict("big").await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_reservation_releases_capacity() {
        let (scheduler, _engine) = scheduler_with(21.0);
        let before = scheduler.free_budget_gb();

        let reservation = scheduler.acquire("big").await.unwrap();
        assert!(!reservation.was_resident());
        assert_eq!(scheduler.free_budget_gb(), before - 10.0);
        assert!(!scheduler.is_resident("big"));

        drop(reservation);
        assert_eq!(scheduler.free_budget_gb(), before);
        assert!(scheduler.residency().is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_reservation_stays_resident() {
        let (scheduler, _engine) = scheduler_with(21.0);
        scheduler.acquire("medium").await.unwrap().confirm();
        assert!(scheduler.is_resident("medium"));

        let again = scheduler.acquire("medium").await.unwrap();
        assert!(again.was_resident());
        drop(again);
        assert!(scheduler.is_resident("medium"));
    }

    #[tokio::test]
    async fn test_pending_reservation_is_not_evictable() {
        // 12 GB usable
        let (scheduler, _engine) = scheduler_with(13.0);
        let pending = scheduler.acquire("big").await.unwrap();

        let err = scheduler.acquire("medium").await.unwrap_err();
        assert!(matches!(err, SchedulerError::CapacityExhausted { .. }));

        drop(pending);
        scheduler.acquire("medium").await.unwrap().confirm();
        assert!(scheduler.is_resident("medium"));
    }

    #[tokio::test]
    async fn test_model_serving_a_request_is_not_evicted() {
        // 12 GB usable
        let (scheduler, engine) = scheduler_with(13.0);
        scheduler.mark_resident("medium").await.unwrap();

        let in_flight = scheduler.acquire("medium").await.unwrap();
        assert!(in_flight.was_resident());
        assert_eq!(scheduler.residency()[0].in_use, 1);

        let err = scheduler.acquire("big").await.unwrap_err();
        assert!(matches!(err, SchedulerError::CapacityExhausted { .. }));
        assert!(!scheduler.evict("medium").await.unwrap());
        assert!(engine.unloaded.lock().is_empty());

        in_flight.confirm();
        assert!(scheduler.is_resident("medium"));
        assert_eq!(scheduler.residency()[0].in_use, 0);

        let big = scheduler.acquire("big").await.unwrap();
        assert_eq!(big.evicted(), ["medium".to_string()]);
        big.confirm();
    }

    #[tokio::test]
    async fn test_failed_loader_keeps_entry_a_sharer_confirmed() {
        let (scheduler, _engine) = scheduler_with(21.0);
        let loader = scheduler.acquire("medium").await.unwrap();
        let sharer = scheduler.acquire("medium").await.unwrap();
        assert!(sharer.was_resident());

        sharer.confirm();
        drop(loader);
        assert!(scheduler.is_resident("medium"));
        assert_eq!(scheduler.residency()[0].in_use, 0);
    }

    #[tokio::test]
    async fn test_last_failed_holder_releases_pending_entry() {
        let (scheduler, _engine) = scheduler_with(21.0);
        let before = scheduler.free_budget_gb();
        let loader = scheduler.acquire("medium").await.unwrap();
        let sharer = scheduler.acquire("medium").await.unwrap();

        drop(loader);
        assert_eq!(scheduler.residency().len(), 1);
        drop(sharer);
        assert!(scheduler.residency().is_empty());
        assert_eq!(scheduler.free_budget_gb(), before);
    }

    #[tokio::test]
    async fn test_unknown_model_uses_default_footprint() {
        let (scheduler, _engine) = scheduler_with(21.0);
        scheduler.mark_resident("phi3:mini").await.unwrap();
        let entry = &scheduler.residency()[0];
        assert_eq!(entry.footprint_gb, 3.0);
        assert!(!entry.always_resident);
    }

    #[tokio::test]
    async fn test_concurrent_acquires_never_overcommit() {
        let (scheduler, _engine) = scheduler_with(21.0);
        let scheduler = Arc::new(scheduler);

        let mut handles = Vec::new();
        for i in 0..16 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("literal-{}", i % 8);
                if let Ok(reservation) = scheduler.acquire(&name).await {
                    reservation.confirm();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let used: f64 = scheduler.residency().iter().map(|e| e.footprint_gb).sum();
        assert!(used <= scheduler.usable_capacity_gb() + BUDGET_EPSILON_GB);
    }

    #[tokio::test]
    async fn test_stats_fall_back_to_estimate() {
        let (scheduler, _engine) = scheduler_with(21.0);
        scheduler.mark_resident("medium").await.unwrap();

        let stats = scheduler.get_stats().await;
        assert_eq!(stats.source, StatsSource::Estimate);
        assert_eq!(stats.capacity_gb, 21.0);
        assert_eq!(stats.used_gb, 8.0);
        assert_eq!(stats.free_gb, 12.0);
        assert!(stats.telemetry_error.is_some());
    }

    #[tokio::test]
    async fn test_stats_prefer_live_telemetry() {
        let catalog = Arc::new(
            ModelCatalog::new(ModelCatalogFile {
                default_model: "big".to_string(),
                default_footprint_gb: 3.0,
                models: vec![model("big", 10.0, false)],
            })
            .unwrap(),
        );
        let scheduler = AcceleratorScheduler::new(
            AcceleratorConfig::default(),
            catalog,
            Arc::new(RecordingEngine::default()),
            Arc::new(FixedTelemetry),
        );

        let stats = scheduler.get_stats().await;
        assert_eq!(stats.source, StatsSource::Telemetry);
        assert_eq!(stats.free_gb, 14.5);
        assert_eq!(stats.device.as_deref(), Some("Test GPU"));
        assert_eq!(stats.budget_free_gb, 22.5);
    }

    #[tokio::test]
    async fn test_preload_loads_pinned_models() {
        let (scheduler, engine) = scheduler_with(21.0);
        let loaded = scheduler.preload_always_resident().await;
        assert_eq!(loaded, vec!["embed".to_string()]);
        assert_eq!(*engine.loaded.lock(), vec!["embed".to_string()]);
        assert!(scheduler.is_resident("embed"));
    }

    #[tokio::test]
    async fn test_invalid_capacity_request() {
        let (scheduler, _engine) = scheduler_with(21.0);
        assert!(matches!(
            scheduler.ensure_capacity(f64::NAN).await,
            Err(SchedulerError::InvalidRequest { .. })
        ));
    }
}
