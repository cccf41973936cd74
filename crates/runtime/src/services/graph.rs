//! Service graph: descriptors, boot phases and live status

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use super::launcher::ServiceLauncher;
use super::log_buffer::{LogBuffer, LogLevel};
use super::probe::{HealthProbe, HealthTarget, ProbeResult};
use super::{ServiceDescriptor, ServiceError, ServiceState, ServiceStatus, ServicesFile};
use crate::config::load_catalog;

/// Services that boot together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootPhase {
    pub number: u32,
    pub services: Vec<String>,
}

/// Service descriptor joined with its live status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub id: String,
    pub name: String,
    pub critical: bool,
    pub on_demand: bool,
    pub depends_on: Vec<String>,
    pub health: String,
    pub phase: u32,
    #[serde(flatten)]
    pub status: ServiceStatus,
}

/// Number of services in each state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCounts {
    pub total: usize,
    pub dormant: usize,
    pub starting: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub failed: usize,
}

struct ServiceNode {
    descriptor: ServiceDescriptor,
    target: HealthTarget,
    phase: u32,
}

pub struct ServiceGraph {
    /// Declaration order
    nodes: Vec<ServiceNode>,
    index: HashMap<String, usize>,
    phases: Vec<BootPhase>,
    statuses: RwLock<HashMap<String, ServiceStatus>>,
    probe: Arc<dyn HealthProbe>,
    launcher: Arc<dyn ServiceLauncher>,
    log: Arc<LogBuffer>,
}

impl ServiceGraph {
    /// Validate descriptors and resolve boot phases.
    ///
    /// A service's phase is the larger of its declared phase and one past
    /// the phase of its latest dependency.
    pub fn new(
        file: ServicesFile,
        probe: Arc<dyn HealthProbe>,
        launcher: Arc<dyn ServiceLauncher>,
        log: Arc<LogBuffer>,
    ) -> Result<Self, ServiceError> {
        let mut index = HashMap::new();
        let mut nodes = Vec::with_capacity(file.services.len());

        for descriptor in file.services {
            if index.contains_key(&descriptor.id) {
                return Err(ServiceError::DuplicateService { id: descriptor.id });
            }
            let target = HealthTarget::parse(&descriptor.health).ok_or_else(|| {
                ServiceError::InvalidHealthAddress {
                    service: descriptor.id.clone(),
                    address: descriptor.health.clone(),
                }
            })?;
            if descriptor
                .restart
                .as_ref()
                .and_then(|r| r.max_retries)
                == Some(0)
            {
                return Err(ServiceError::InvalidRestartOverride {
                    service: descriptor.id.clone(),
                    reason: "max_retries must be at least 1".to_string(),
                });
            }
            index.insert(descriptor.id.clone(), nodes.len());
            nodes.push(ServiceNode {
                descriptor,
                target,
                phase: 0,
            });
        }

        for node in &nodes {
            for dependency in &node.descriptor.depends_on {
                if !index.contains_key(dependency) {
                    return Err(ServiceError::UnknownDependency {
                        service: node.descriptor.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let resolved = resolve_phases(&nodes, &index)?;
        for (node, phase) in nodes.iter_mut().zip(resolved) {
            node.phase = phase;
        }

        let mut grouped: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for node in &nodes {
            grouped
                .entry(node.phase)
                .or_default()
                .push(node.descriptor.id.clone());
        }
        let phases = grouped
            .into_iter()
            .map(|(number, services)| BootPhase { number, services })
            .collect();

        let statuses = nodes
            .iter()
            .map(|n| (n.descriptor.id.clone(), ServiceStatus::default()))
            .collect();

        Ok(Self {
            nodes,
            index,
            phases,
            statuses: RwLock::new(statuses),
            probe,
            launcher,
            log,
        })
    }

    /// Load the service catalogue from a YAML, TOML or JSON file
    pub fn from_path(
        path: &Path,
        probe: Arc<dyn HealthProbe>,
        launcher: Arc<dyn ServiceLauncher>,
        log: Arc<LogBuffer>,
    ) -> Result<Self, ServiceError> {
        let file: ServicesFile = load_catalog(path)?;
        Self::new(file, probe, launcher, log)
    }

    fn node(&self, id: &str) -> Result<&ServiceNode, ServiceError> {
        self.index
            .get(id)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| ServiceError::UnknownService { id: id.to_string() })
    }

    pub fn descriptor(&self, id: &str) -> Option<&ServiceDescriptor> {
        self.index.get(id).map(|&i| &self.nodes[i].descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.nodes.iter().map(|n| &n.descriptor)
    }

    pub fn phases(&self) -> &[BootPhase] {
        &self.phases
    }

    pub fn phase_of(&self, id: &str) -> Option<u32> {
        self.index.get(id).map(|&i| self.nodes[i].phase)
    }

    pub fn log(&self) -> &Arc<LogBuffer> {
        &self.log
    }

    pub fn launcher(&self) -> &Arc<dyn ServiceLauncher> {
        &self.launcher
    }

    pub fn status(&self, id: &str) -> Option<ServiceStatus> {
        self.statuses.read().get(id).cloned()
    }

    pub fn state(&self, id: &str) -> Option<ServiceState> {
        self.statuses.read().get(id).map(|s| s.state)
    }

    pub fn snapshot(&self, id: &str) -> Option<ServiceSnapshot> {
        let node = self.node(id).ok()?;
        let status = self.status(id)?;
        Some(to_snapshot(node, status))
    }

    /// Every service with its status, in declaration order
    pub fn snapshots(&self) -> Vec<ServiceSnapshot> {
        let statuses = self.statuses.read();
        self.nodes
            .iter()
            .map(|node| {
                let status = statuses
                    .get(&node.descriptor.id)
                    .cloned()
                    .unwrap_or_default();
                to_snapshot(node, status)
            })
            .collect()
    }

    pub fn counts(&self) -> ServiceCounts {
        let statuses = self.statuses.read();
        let mut counts = ServiceCounts {
            total: statuses.len(),
            ..ServiceCounts::default()
        };
        for status in statuses.values() {
            match status.state {
                ServiceState::Dormant => counts.dormant += 1,
                ServiceState::Starting => counts.starting += 1,
                ServiceState::Healthy => counts.healthy += 1,
                ServiceState::Unhealthy => counts.unhealthy += 1,
                ServiceState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Ids of services the health guardian should poll
    pub fn monitored(&self) -> Vec<String> {
        let statuses = self.statuses.read();
        self.nodes
            .iter()
            .map(|n| &n.descriptor.id)
            .filter(|id| statuses.get(*id).map(|s| s.state.is_monitored()).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Probe a service once without changing its state
    pub async fn check_health(&self, id: &str) -> Result<ProbeResult, ServiceError> {
        let node = self.node(id)?;
        Ok(self.probe.probe(id, &node.target).await)
    }

    /// Apply a mutation to a service's status under the write lock
    pub(crate) fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ServiceStatus) -> R,
    ) -> Result<R, ServiceError> {
        let mut statuses = self.statuses.write();
        let status = statuses
            .get_mut(id)
            .ok_or_else(|| ServiceError::UnknownService { id: id.to_string() })?;
        Ok(f(status))
    }

    /// Store the timing of a probe result
    pub(crate) fn note_probe(&self, id: &str, result: &ProbeResult) -> Result<(), ServiceError> {
        self.update(id, |status| {
            status.last_check = Some(result.checked_at);
            status.last_latency_ms = Some(result.latency_ms);
            if !result.healthy {
                status.last_error = result.detail.clone();
            }
        })
    }

    /// Move a service to `starting` and run its launcher.
    pub async fn launch(&self, id: &str) -> Result<(), ServiceError> {
        let node = self.node(id)?;
        self.update(id, |status| {
            status.state = ServiceState::Starting;
            status.started_at = Some(tokio::time::Instant::now());
            status.last_error = None;
        })?;
        self.log.record(id, LogLevel::Info, "starting");

        if let Err(e) = self.launcher.launch(&node.descriptor).await {
            self.update(id, |status| status.last_error = Some(e.to_string()))?;
            self.log.record(id, LogLevel::Error, e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Restart a service process without touching its state
    pub(crate) async fn relaunch(&self, id: &str) -> Result<(), ServiceError> {
        let node = self.node(id)?;
        self.launcher.launch(&node.descriptor).await
    }

    /// Start an on-demand service on first use.
    ///
    /// Dormant services are launched and probed once; already running
    /// services are left alone. A failed service must be reset first.
    pub async fn ensure_started(&self, id: &str) -> Result<ServiceState, ServiceError> {
        match self.state(id) {
            None => Err(ServiceError::UnknownService { id: id.to_string() }),
            Some(ServiceState::Failed) => Err(ServiceError::Failed {
                service: id.to_string(),
            }),
            Some(ServiceState::Dormant) => {
                self.launch(id).await?;
                let result = self.check_health(id).await?;
                self.note_probe(id, &result)?;
                if result.healthy {
                    self.update(id, |status| status.state = ServiceState::Healthy)?;
                    self.log.record(id, LogLevel::Info, "healthy");
                }
                self.state(id)
                    .ok_or_else(|| ServiceError::UnknownService { id: id.to_string() })
            }
            Some(state) => Ok(state),
        }
    }

    /// Operator intervention: clear failure counters and start again.
    pub async fn reset(&self, id: &str) -> Result<ServiceState, ServiceError> {
        self.update(id, |status| {
            *status = ServiceStatus::default();
        })?;
        self.log.record(id, LogLevel::Info, "reset by operator");
        self.ensure_started(id).await
    }
}

fn to_snapshot(node: &ServiceNode, status: ServiceStatus) -> ServiceSnapshot {
    let d = &node.descriptor;
    ServiceSnapshot {
        id: d.id.clone(),
        name: d.display_name().to_string(),
        critical: d.critical,
        on_demand: d.on_demand,
        depends_on: d.depends_on.clone(),
        health: d.health.clone(),
        phase: node.phase,
        status,
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Depth-first phase resolution with cycle detection
fn resolve_phases(
    nodes: &[ServiceNode],
    index: &HashMap<String, usize>,
) -> Result<Vec<u32>, ServiceError> {
    fn visit(
        i: usize,
        nodes: &[ServiceNode],
        index: &HashMap<String, usize>,
        marks: &mut [Mark],
        phases: &mut [u32],
        path: &mut Vec<usize>,
    ) -> Result<u32, ServiceError> {
        match marks[i] {
            Mark::Done => return Ok(phases[i]),
            Mark::Visiting => {
                let start = path.iter().position(|&p| p == i).unwrap_or(0);
                let mut services: Vec<String> = path[start..]
                    .iter()
                    .map(|&p| nodes[p].descriptor.id.clone())
                    .collect();
                services.push(nodes[i].descriptor.id.clone());
                return Err(ServiceError::DependencyCycle { services });
            }
            Mark::Unvisited => {}
        }

        marks[i] = Mark::Visiting;
        path.push(i);

        let mut phase = nodes[i].descriptor.phase.unwrap_or(0);
        for dependency in &nodes[i].descriptor.depends_on {
            let j = index[dependency];
            let dependency_phase = visit(j, nodes, index, marks, phases, path)?;
            phase = phase.max(dependency_phase + 1);
        }

        path.pop();
        marks[i] = Mark::Done;
        phases[i] = phase;
        Ok(phase)
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut phases = vec![0; nodes.len()];
    let mut path = Vec::new();
    for i in 0..nodes.len() {
        visit(i, nodes, index, &mut marks, &mut phases, &mut path)?;
    }
    Ok(phases)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Probe whose answers are set by the test
    #[derive(Default)]
    pub struct ScriptedProbe {
        pub healthy: Mutex<HashSet<String>>,
        pub probes: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        pub fn set_healthy(&self, id: &str, healthy: bool) {
            let mut set = self.healthy.lock();
            if healthy {
                set.insert(id.to_string());
            } else {
                set.remove(id);
            }
        }

        pub fn probe_count(&self, id: &str) -> usize {
            self.probes.lock().iter().filter(|p| p.as_str() == id).count()
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, service_id: &str, _target: &HealthTarget) -> ProbeResult {
            self.probes.lock().push(service_id.to_string());
            if self.healthy.lock().contains(service_id) {
                ProbeResult::healthy(std::time::Duration::from_millis(1))
            } else {
                ProbeResult::unhealthy(std::time::Duration::from_millis(1), "connection refused")
            }
        }
    }

    /// Launcher that only records launches
    #[derive(Default)]
    pub struct RecordingLauncher {
        pub launches: Mutex<Vec<String>>,
    }

    impl RecordingLauncher {
        pub fn launch_count(&self, id: &str) -> usize {
            self.launches.lock().iter().filter(|l| l.as_str() == id).count()
        }
    }

    #[async_trait]
    impl ServiceLauncher for RecordingLauncher {
        async fn launch(&self, service: &ServiceDescriptor) -> Result<(), ServiceError> {
            self.launches.lock().push(service.id.clone());
            Ok(())
        }
    }

    pub fn service(id: &str, depends_on: &[&str]) -> ServiceDescriptor {
        ServiceDescriptor {
            id: id.to_string(),
            name: None,
            critical: false,
            on_demand: false,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            health: format!("http://127.0.0.1:1/{}/health", id),
            start: None,
            phase: None,
            restart: None,
        }
    }

    pub fn graph_with(
        services: Vec<ServiceDescriptor>,
    ) -> (Arc<ServiceGraph>, Arc<ScriptedProbe>, Arc<RecordingLauncher>) {
        let probe = Arc::new(ScriptedProbe::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let graph = ServiceGraph::new(
            ServicesFile { services },
            probe.clone(),
            launcher.clone(),
            Arc::new(LogBuffer::new(100)),
        )
        .unwrap();
        (Arc::new(graph), probe, launcher)
    }
}
