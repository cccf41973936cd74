//! Health guardian: continuous probing with bounded restarts

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use super::graph::ServiceGraph;
use super::log_buffer::LogLevel;
use super::probe::ProbeResult;
use super::ServiceState;
use crate::config::{HealthConfig, RestartPolicy};

/// What one polling cycle observed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub probed: usize,
    pub healthy: usize,
    pub restarted: Vec<String>,
    pub failed: Vec<String>,
}

pub struct HealthGuardian {
    graph: Arc<ServiceGraph>,
    config: HealthConfig,
}

/// Handle to a running guardian loop
pub struct GuardianHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl GuardianHandle {
    /// Stop the loop and wait for the in-flight cycle to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::warn!("Health guardian task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl HealthGuardian {
    pub fn new(graph: Arc<ServiceGraph>, config: HealthConfig) -> Self {
        Self { graph, config }
    }

    /// Spawn the polling loop.
    pub fn start(self: Arc<Self>) -> GuardianHandle {
        let shutdown = Arc::new(Notify::new());
        let shutdown_notify = shutdown.clone();
        let guardian = self;

        let task = tokio::spawn(async move {
            let mut ticker = interval(guardian.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                "Health guardian started (interval {:?})",
                guardian.config.interval
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        guardian.run_cycle().await;
                    }
                    _ = shutdown_notify.notified() => {
                        break;
                    }
                }
            }
            tracing::info!("Health guardian stopped");
        });

        GuardianHandle { shutdown, task }
    }

    fn policy_for(&self, id: &str) -> RestartPolicy {
        let overrides = self
            .graph
            .descriptor(id)
            .and_then(|d| d.restart.as_ref());
        self.config.restart.with_override(overrides)
    }

    /// A service still `starting` inside its grace window is not yet
    /// held to the restart policy.
    fn within_startup_grace(&self, id: &str) -> bool {
        self.graph
            .status(id)
            .filter(|s| s.state == ServiceState::Starting)
            .and_then(|s| s.started_at)
            .map(|since| since.elapsed() < self.config.startup_grace)
            .unwrap_or(false)
    }

    /// Probe every monitored service once and apply the restart policy.
    pub async fn run_cycle(&self) -> CycleSummary {
        let now = Instant::now();
        let due: Vec<String> = self
            .graph
            .monitored()
            .into_iter()
            .filter(|id| {
                self.graph
                    .status(id)
                    .and_then(|s| s.next_probe_at)
                    .map(|at| at <= now)
                    .unwrap_or(true)
            })
            .collect();

        let results = join_all(due.iter().map(|id| async move {
            (id.clone(), self.graph.check_health(id).await)
        }))
        .await;

        let mut summary = CycleSummary::default();
        for (id, result) in results {
            let Ok(result) = result else { continue };
            summary.probed += 1;
            self.observe(&id, &result, &mut summary).await;
        }
        summary
    }

    async fn observe(&self, id: &str, result: &ProbeResult, summary: &mut CycleSummary) {
        let log = self.graph.log();
        if self.graph.note_probe(id, result).is_err() {
            return;
        }

        if result.healthy {
            summary.healthy += 1;
            let previous = self.graph.update(id, |status| {
                let previous = status.state;
                status.state = ServiceState::Healthy;
                status.consecutive_failures = 0;
                status.restart_attempts = 0;
                status.next_probe_at = None;
                status.last_error = None;
                previous
            });
            match previous {
                Ok(ServiceState::Healthy) => {}
                Ok(ServiceState::Unhealthy) => {
                    log.record(id, LogLevel::Info, format!("recovered ({} ms)", result.latency_ms))
                }
                Ok(_) => log.record(id, LogLevel::Info, format!("healthy ({} ms)", result.latency_ms)),
                Err(_) => {}
            }
            return;
        }

        let detail = result.detail.clone().unwrap_or_else(|| "unhealthy".to_string());
        if self.within_startup_grace(id) {
            tracing::debug!("{} not ready yet ({}), still within startup grace", id, detail);
            return;
        }

        let policy = self.policy_for(id);
        let outcome = self.graph.update(id, |status| {
            status.consecutive_failures += 1;
            if status.consecutive_failures >= policy.max_retries {
                status.state = ServiceState::Failed;
                status.next_probe_at = None;
                None
            } else {
                status.state = ServiceState::Unhealthy;
                status.restart_attempts += 1;
                status.next_probe_at =
                    Some(Instant::now() + policy.delay_for(status.restart_attempts));
                Some((status.consecutive_failures, status.restart_attempts))
            }
        });

        match outcome {
            Ok(None) => {
                log.record(
                    id,
                    LogLevel::Error,
                    format!(
                        "failed {} consecutive health checks ({}); giving up until reset",
                        policy.max_retries, detail
                    ),
                );
                summary.failed.push(id.to_string());
            }
            Ok(Some((failures, attempt))) => {
                log.record(
                    id,
                    LogLevel::Warn,
                    format!(
                        "unhealthy ({}), restart attempt {}/{} after {} failure(s)",
                        detail,
                        attempt,
                        policy.max_retries.saturating_sub(1),
                        failures
                    ),
                );
                if let Err(e) = self.graph.relaunch(id).await {
                    log.record(id, LogLevel::Error, format!("restart failed: {}", e));
                }
                summary.restarted.push(id.to_string());
            }
            Err(_) => {}
        }
    }
}
