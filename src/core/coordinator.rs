//! Keeps the worker pool in line with the configured targets.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{error::CoordinatorError, pool::WorkerPool};
use crate::config::{targets::Target, Config};

/// Where the desired target set comes from.
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn load_targets(&self) -> Result<Vec<Target>, CoordinatorError>;
}

/// Reads `[[targets]]` from the configuration file on every load.
#[derive(Debug, Clone)]
pub struct ConfigTargetSource {
    path: PathBuf,
}

impl ConfigTargetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TargetSource for ConfigTargetSource {
    async fn load_targets(&self) -> Result<Vec<Target>, CoordinatorError> {
        let path = self.path.clone();
        let config = tokio::task::spawn_blocking(move || Config::read(&path))
            .await
            .map_err(|e| CoordinatorError::Unavailable(e.to_string()))??;
        Ok(config.targets)
    }
}

pub struct Coordinator {
    source: Box<dyn TargetSource>,
    pool: WorkerPool,
    last_known: Vec<Target>,
}

impl Coordinator {
    /// Loads the initial target set and hands it to the pool. Any failure
    /// here is fatal to the caller.
    pub async fn bootstrap(
        source: Box<dyn TargetSource>,
        pool: WorkerPool,
    ) -> Result<Self, CoordinatorError> {
        let targets = source.load_targets().await?;
        let report = pool.reconcile(targets.clone()).await?;

        info!(
            targets = targets.len(),
            started = report.started.len(),
            failed = report.failed.len(),
            "Initial target set applied"
        );
        for id in &report.failed {
            warn!(target = %id, "Worker not started, retrying on the next reload");
        }

        Ok(Self {
            source,
            pool,
            last_known: targets,
        })
    }

    /// Reloads the target set. A failing source leaves the pool serving the
    /// last-known set.
    pub async fn rebuild(&mut self) {
        match self.source.load_targets().await {
            Ok(targets) => {
                info!(targets = targets.len(), "Target set reloaded");
                if let Err(e) = self.pool.update_targets(targets.clone()) {
                    error!("Cannot apply reloaded targets: {e}");
                    return;
                }
                self.last_known = targets;
            }
            Err(e) => {
                warn!(
                    targets = self.last_known.len(),
                    "Target reload failed, keeping last-known set: {e}"
                );
            }
        }
    }

    pub fn last_known(&self) -> &[Target] {
        &self.last_known
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}
