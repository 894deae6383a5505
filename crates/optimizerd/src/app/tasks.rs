use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, app: &Application) {
        let optimizer_task = self.spawn_optimizer_task(app);
        self.tasks.push(optimizer_task);
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        // Set up signal handling for graceful shutdown
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                        return;
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        tokio::select! {
            // Wait for shutdown signal
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.shutdown(SHUTDOWN_TIMEOUT).await;
            }
            // Wait for any task to complete unexpectedly
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Task completed unexpectedly");
            }
        }

        Ok(())
    }

    /// Cancel every task and wait for them to finish.
    ///
    /// A running optimizer cycle is allowed to complete; the loop stops
    /// before starting the next one.
    pub async fn shutdown(&mut self, timeout: Duration) {
        self.cancellation_token.cancel();
        self.wait_for_tasks_with_timeout(timeout).await;
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_optimizer_task(&self, app: &Application) -> JoinHandle<()> {
        let optimizer = app.optimizer().clone();
        let interval = app.daemon_args().interval();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting optimizer task");
            optimizer.run(interval, token).await;
            tracing::info!("Optimizer task completed");
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use test_log::test;

    use super::*;
    use crate::app::ApplicationBuilder;
    use crate::config::{Cli, Commands};

    #[test(tokio::test)]
    async fn shutdown_stops_the_optimizer_loop() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let snapshot = dir.path().join("snapshot.yaml");
        std::fs::write(&snapshot, "pairs: []\n").expect("write snapshot");

        let cli = Cli::try_parse_from([
            "optimizerd",
            "daemon",
            "--snapshot-file",
            &snapshot.display().to_string(),
            "--interval-secs",
            "3600",
        ])
        .expect("parse arguments");
        let Commands::Daemon(args) = cli.command else {
            panic!("expected daemon command");
        };
        let app = ApplicationBuilder::new(*args)
            .build()
            .expect("build application");

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(&app);
        while app.optimizer().cycles() == 0 {
            tokio::task::yield_now().await;
        }

        tasks.shutdown(Duration::from_secs(5)).await;

        assert!(tasks.tasks.iter().all(JoinHandle::is_finished));
        assert_eq!(app.optimizer().cycles(), 1);
    }
}
