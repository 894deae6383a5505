use clap::{Parser, Subcommand};
use utils::version;

use crate::config::daemon::{DaemonArgs, ValidateConfigArgs};

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the connection optimizer daemon
    Daemon(Box<DaemonArgs>),
    /// Check an optimizer configuration file, and optionally a snapshot file
    #[command(name = "validate-config")]
    ValidateConfig(ValidateConfigArgs),
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn parses_daemon_arguments() {
        let cli = Cli::try_parse_from([
            "optimizerd",
            "daemon",
            "--snapshot-file",
            "/var/lib/optimizer/snapshot.yaml",
            "--state-file",
            "/var/lib/optimizer/state.json",
            "--interval-secs",
            "30",
            "--metrics-format",
            "json",
        ])
        .expect("should parse daemon arguments");

        let Commands::Daemon(args) = cli.command else {
            panic!("expected daemon command");
        };
        assert_eq!(
            args.snapshot_file,
            PathBuf::from("/var/lib/optimizer/snapshot.yaml")
        );
        assert_eq!(
            args.state_file,
            Some(PathBuf::from("/var/lib/optimizer/state.json"))
        );
        assert_eq!(args.interval_secs, 30);
        assert_eq!(args.metrics_format, "json");
        assert_eq!(args.config, None);
    }

    #[test]
    fn parses_validate_config_arguments() {
        let cli = Cli::try_parse_from([
            "optimizerd",
            "validate-config",
            "--config",
            "optimizer.yaml",
        ])
        .expect("should parse validate-config arguments");

        let Commands::ValidateConfig(args) = cli.command else {
            panic!("expected validate-config command");
        };
        assert_eq!(args.config, PathBuf::from("optimizer.yaml"));
        assert_eq!(args.snapshot_file, None);
    }
}
