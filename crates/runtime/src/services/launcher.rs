//! Starting and restarting service processes

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::{Child, Command};

use super::{ServiceDescriptor, ServiceError};

#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    /// Start the service, replacing any process previously started for it.
    async fn launch(&self, service: &ServiceDescriptor) -> Result<(), ServiceError>;

    /// Stop every process this launcher started.
    async fn shutdown(&self) {}
}

/// Spawns the descriptor's `start` command as a child process.
///
/// Services without a command are managed externally and launching them is
/// a no-op; the health probe alone decides whether they are up.
#[derive(Default)]
pub struct CommandLauncher {
    children: Mutex<HashMap<String, Child>>,
}

impl CommandLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(&self) -> Vec<String> {
        let mut children = self.children.lock();
        children.retain(|_, child| matches!(child.try_wait(), Ok(None)));
        children.keys().cloned().collect()
    }
}

#[async_trait]
impl ServiceLauncher for CommandLauncher {
    async fn launch(&self, service: &ServiceDescriptor) -> Result<(), ServiceError> {
        let Some((program, args)) = service.start.as_ref().and_then(|cmd| cmd.split_first())
        else {
            tracing::debug!("Service {} has no start command; assuming externally managed", service.id);
            return Ok(());
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServiceError::LaunchFailed {
                service: service.id.clone(),
                reason: format!("{}: {}", program, e),
            })?;

        tracing::info!(
            "Launched service {} (pid {:?})",
            service.id,
            child.id()
        );

        let previous = self.children.lock().insert(service.id.clone(), child);
        if let Some(mut previous) = previous {
            if let Err(e) = previous.start_kill() {
                tracing::debug!("Previous process for {} already gone: {}", service.id, e);
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {
        let children: Vec<(String, Child)> = self.children.lock().drain().collect();
        for (id, mut child) in children {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Process for {} already exited: {}", id, e);
            }
            let _ = child.wait().await;
        }
    }
}
