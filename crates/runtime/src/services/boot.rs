//! Phased boot sequencer

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;

use super::graph::ServiceGraph;
use super::log_buffer::LogLevel;
use super::{BootError, ServiceState};
use crate::config::BootConfig;

/// Outcome of one boot phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub number: u32,
    pub launched: Vec<String>,
    /// Services confirmed healthy before the phase closed
    pub healthy: Vec<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootReport {
    pub phases: Vec<PhaseReport>,
    pub elapsed_ms: u64,
}

pub struct BootSequencer {
    graph: Arc<ServiceGraph>,
    config: BootConfig,
}

impl BootSequencer {
    pub fn new(graph: Arc<ServiceGraph>, config: BootConfig) -> Self {
        Self { graph, config }
    }

    /// Walk the boot phases in order.
    ///
    /// Every non-on-demand service in a phase is launched concurrently. The
    /// next phase starts only once all critical services of this one are
    /// healthy; if that takes longer than the phase timeout the boot stops.
    pub async fn run(&self) -> Result<BootReport, BootError> {
        let boot_start = Instant::now();
        let mut reports = Vec::new();

        for phase in self.graph.phases().to_vec() {
            let phase_start = Instant::now();
            let members: Vec<String> = phase
                .services
                .iter()
                .filter(|id| {
                    self.graph
                        .descriptor(id)
                        .map(|d| !d.on_demand)
                        .unwrap_or(false)
                })
                .filter(|id| self.graph.state(id) == Some(ServiceState::Dormant))
                .cloned()
                .collect();

            if members.is_empty() {
                continue;
            }

            tracing::info!("Boot phase {}: starting {:?}", phase.number, members);
            let launches = join_all(members.iter().map(|id| self.graph.launch(id))).await;
            for (id, result) in members.iter().zip(launches) {
                if let Err(e) = result {
                    // The health gate still decides; the service may be up already.
                    tracing::warn!("Launch of {} failed: {}", id, e);
                }
            }

            let mut critical: Vec<String> = members
                .iter()
                .filter(|id| self.graph.descriptor(id).map(|d| d.critical).unwrap_or(false))
                .cloned()
                .collect();
            let mut waiting: Vec<String> = members.clone();
            let mut healthy = Vec::new();
            let deadline = phase_start + self.config.phase_timeout;

            loop {
                let probes = join_all(waiting.iter().map(|id| async move {
                    (id.clone(), self.graph.check_health(id).await)
                }))
                .await;

                for (id, result) in probes {
                    let Ok(result) = result else { continue };
                    self.graph.note_probe(&id, &result)?;
                    if result.healthy {
                        self.graph.update(&id, |status| {
                            status.state = ServiceState::Healthy;
                            status.consecutive_failures = 0;
                        })?;
                        self.graph.log().record(&id, LogLevel::Info, "healthy");
                        healthy.push(id);
                    }
                }

                waiting.retain(|id| !healthy.contains(id));
                critical.retain(|id| !healthy.contains(id));

                if critical.is_empty() {
                    break;
                }

                let now = Instant::now();
                if now >= deadline {
                    for id in &critical {
                        self.graph.log().record(
                            id,
                            LogLevel::Error,
                            format!("not healthy within {:?}; boot halted", self.config.phase_timeout),
                        );
                    }
                    return Err(BootError::PhaseTimedOut {
                        phase: phase.number,
                        pending: critical,
                    });
                }
                tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
            }

            reports.push(PhaseReport {
                number: phase.number,
                launched: members,
                healthy,
                elapsed_ms: phase_start.elapsed().as_millis() as u64,
            });
        }

        let elapsed_ms = boot_start.elapsed().as_millis() as u64;
        tracing::info!("Boot completed in {} ms", elapsed_ms);
        Ok(BootReport {
            phases: reports,
            elapsed_ms,
        })
    }
}
