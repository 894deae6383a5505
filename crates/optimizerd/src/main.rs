mod app;
mod config;
mod logging;
mod metrics;
mod snapshot;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use utils::version;

use crate::app::ApplicationBuilder;
use crate::config::Cli;
use crate::config::Commands;
use crate::config::{DaemonArgs, ValidateConfigArgs};

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::ValidateConfig(args) => run_validate_config(args),
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(daemon_args.metrics_file.clone());

    tracing::info!("Starting optimizer daemon {}", &**version::VERSION);

    let app = ApplicationBuilder::new(daemon_args).build()?;

    app.run().await?;

    Ok(())
}

fn run_validate_config(args: ValidateConfigArgs) -> Result<()> {
    utils::logging::init();

    let cfg = config::load_optimizer_config(Some(args.config.as_path()))?;
    cfg.validate()
        .map_err(|e| anyhow::anyhow!("{e:?}"))
        .with_context(|| format!("invalid optimizer config {}", args.config.display()))?;
    tracing::info!(config = ?cfg, "optimizer config is valid");

    if let Some(path) = &args.snapshot_file {
        let snapshot = snapshot::load_snapshot(path).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        tracing::info!(
            pairs = snapshot.pairs.len(),
            storages = snapshot.storages.len(),
            net_links = snapshot.net_links.len(),
            "snapshot is valid"
        );
    }

    Ok(())
}
