use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use optimizer::{Optimizer, PairStateStore, TracingSink};

use crate::app::core::Application;
use crate::config::{load_optimizer_config, DaemonArgs};
use crate::metrics::MetricsSink;
use crate::snapshot::SnapshotDataSource;

/// Assembles the optimizer and its collaborators from daemon arguments
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    pub fn build(self) -> Result<Application> {
        let args = &self.daemon_args;

        let cfg = load_optimizer_config(args.config.as_deref())
            .context("Failed to load optimizer config")?;
        tracing::info!(config = ?cfg, "optimizer configuration loaded");

        let data_source = SnapshotDataSource::open(&args.snapshot_file, args.state_file.clone())
            .map_err(|e| anyhow::anyhow!("Failed to open snapshot data source: {e:?}"))?;

        let metrics_sink = MetricsSink::new(
            &args.metrics_format,
            args.metrics_extra_labels.clone().unwrap_or_default(),
        );

        let optimizer = Optimizer::new(Arc::new(data_source), Arc::new(PairStateStore::new()), cfg)
            .map_err(|e| anyhow::anyhow!("Failed to create optimizer: {e:?}"))?
            .with_sink(Arc::new(TracingSink))
            .with_sink(Arc::new(metrics_sink));

        Ok(Application::new(Arc::new(optimizer), self.daemon_args))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::Parser;
    use optimizer::{Pair, PairOutcome};
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::config::{Cli, Commands};

    const SNAPSHOT: &str = r#"
pairs:
  - source: https://se1.example.org
    destination: https://se2.example.com
    range: { min: 2, max: 20 }
    active: 4
    submitted: 50
    avgDurationSecs: 20
    transfer: { throughput: 40.0, avgActiveConnections: 4 }
"#;

    fn daemon_args(dir: &Path, extra: &[&str]) -> DaemonArgs {
        let snapshot = dir.join("snapshot.yaml");
        std::fs::write(&snapshot, SNAPSHOT).expect("write snapshot");

        let mut argv = vec![
            "optimizerd".to_string(),
            "daemon".to_string(),
            "--snapshot-file".to_string(),
            snapshot.display().to_string(),
            "--state-file".to_string(),
            dir.join("state.json").display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));

        match Cli::try_parse_from(argv).expect("parse arguments").command {
            Commands::Daemon(args) => *args,
            Commands::ValidateConfig(_) => panic!("expected daemon command"),
        }
    }

    #[test(tokio::test)]
    async fn built_application_decides_and_persists() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let app = ApplicationBuilder::new(daemon_args(dir.path(), &[]))
            .build()
            .expect("build application");

        let report = app.optimizer().run_cycle().await.expect("run cycle");

        let pair = Pair::new("https://se1.example.org", "https://se2.example.com");
        assert!(matches!(
            report.outcome(&pair),
            Some(PairOutcome::Decided { decision: 20, .. })
        ));
        let state = std::fs::read_to_string(dir.path().join("state.json")).expect("state file");
        assert!(state.contains("\"decision\": 20"), "state file: {state}");
    }

    #[test(tokio::test)]
    async fn config_file_is_applied() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = dir.path().join("optimizer.yaml");
        std::fs::write(&config, "workerPoolSize: \"3\"\nemaAlpha: 0.5\n").expect("write config");

        let app = ApplicationBuilder::new(daemon_args(
            dir.path(),
            &["--config", &config.display().to_string()],
        ))
        .build()
        .expect("build application");

        assert_eq!(app.optimizer().config().worker_pool_size, 3);
        assert_eq!(app.optimizer().config().ema_alpha, 0.5);
    }

    #[test]
    fn invalid_config_fails_the_build() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = dir.path().join("optimizer.yaml");
        std::fs::write(&config, "emaAlpha: 1.5\n").expect("write config");

        let result = ApplicationBuilder::new(daemon_args(
            dir.path(),
            &["--config", &config.display().to_string()],
        ))
        .build();

        assert!(result.is_err());
    }
}
