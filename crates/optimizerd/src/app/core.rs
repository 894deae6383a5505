use std::sync::Arc;

use anyhow::Result;
use optimizer::Optimizer;

use crate::app::tasks::Tasks;
use crate::config::DaemonArgs;
use crate::snapshot::SnapshotDataSource;

pub type DaemonOptimizer = Optimizer<SnapshotDataSource>;

/// Application core structure with explicit dependencies
pub struct Application {
    optimizer: Arc<DaemonOptimizer>,
    daemon_args: DaemonArgs,
}

impl Application {
    pub fn new(optimizer: Arc<DaemonOptimizer>, daemon_args: DaemonArgs) -> Self {
        Self {
            optimizer,
            daemon_args,
        }
    }

    pub fn optimizer(&self) -> &Arc<DaemonOptimizer> {
        &self.optimizer
    }

    /// Get daemon arguments
    pub fn daemon_args(&self) -> &DaemonArgs {
        &self.daemon_args
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!(
            cycles = self.optimizer.cycles(),
            tracked_links = self.optimizer.store().len(),
            "Application run completed"
        );
        Ok(())
    }
}
