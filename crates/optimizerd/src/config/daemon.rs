use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use optimizer::OptimizerConfig;
use serde::{Deserialize, Deserializer};

/// Optimizer tunables as read from the YAML configuration file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizerParameters {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub ema_alpha: f64,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub steady_interval_secs: u64,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_streams_per_file: u32,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub low_success_rate: f64,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub base_success_rate: f64,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub increase_step: u32,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub increase_aggressive_step: u32,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub decrease_step: u32,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub default_min_active: u32,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub default_lan_active: u32,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub global_max_per_storage: u32,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub global_max_per_link: u32,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub worker_pool_size: usize,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_idle_cycles: u64,
}

impl Default for OptimizerParameters {
    fn default() -> Self {
        let defaults = OptimizerConfig::default();
        Self {
            ema_alpha: defaults.ema_alpha,
            steady_interval_secs: defaults.steady_interval.as_secs(),
            max_streams_per_file: defaults.max_streams_per_file,
            low_success_rate: defaults.low_success_rate,
            base_success_rate: defaults.base_success_rate,
            increase_step: defaults.increase_step,
            increase_aggressive_step: defaults.increase_aggressive_step,
            decrease_step: defaults.decrease_step,
            default_min_active: defaults.default_min_active,
            default_lan_active: defaults.default_lan_active,
            global_max_per_storage: defaults.global_max_per_storage,
            global_max_per_link: defaults.global_max_per_link,
            worker_pool_size: defaults.worker_pool_size,
            max_idle_cycles: defaults.max_idle_cycles,
        }
    }
}

impl From<&OptimizerParameters> for OptimizerConfig {
    fn from(params: &OptimizerParameters) -> Self {
        Self {
            ema_alpha: params.ema_alpha,
            steady_interval: Duration::from_secs(params.steady_interval_secs),
            max_streams_per_file: params.max_streams_per_file,
            low_success_rate: params.low_success_rate,
            base_success_rate: params.base_success_rate,
            increase_step: params.increase_step,
            increase_aggressive_step: params.increase_aggressive_step,
            decrease_step: params.decrease_step,
            default_min_active: params.default_min_active,
            default_lan_active: params.default_lan_active,
            global_max_per_storage: params.global_max_per_storage,
            global_max_per_link: params.global_max_per_link,
            worker_pool_size: params.worker_pool_size,
            max_idle_cycles: params.max_idle_cycles,
        }
    }
}

/// Custom deserializer for numbers that accepts both string and number formats.
/// Configuration rendered by templating tools often quotes numeric values.
fn deserialize_number_from_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber<T> {
        String(String),
        Number(T),
    }

    match StringOrNumber::<T>::deserialize(deserializer)? {
        StringOrNumber::String(s) => s.trim().parse::<T>().map_err(|e| {
            serde::de::Error::custom(format!("Failed to parse number from string '{s}': {e}"))
        }),
        StringOrNumber::Number(n) => Ok(n),
    }
}

/// Parse YAML (or JSON) text into optimizer parameters
pub fn parse_optimizer_parameters(s: &str) -> Result<OptimizerParameters, String> {
    serde_yaml::from_str(s).map_err(|e| format!("Failed to parse optimizer config: {e}"))
}

/// Load optimizer parameters from a file, falling back to defaults without one
pub fn load_optimizer_config(path: Option<&Path>) -> anyhow::Result<OptimizerConfig> {
    let Some(path) = path else {
        return Ok(OptimizerConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read optimizer config {}", path.display()))?;
    let params = parse_optimizer_parameters(&content)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("parse optimizer config {}", path.display()))?;
    Ok(OptimizerConfig::from(&params))
}

/// Parse `key=value` pairs separated by commas
pub fn parse_extra_labels(s: &str) -> Result<HashMap<String, String>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(|label| {
            let (key, value) = label
                .split_once('=')
                .ok_or_else(|| format!("label '{label}' is not of the form key=value"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("label '{label}' has an empty key"));
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[derive(Parser, Clone)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "OPTIMIZER_SNAPSHOT_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML or JSON file holding link metrics and configuration, reloaded every cycle"
    )]
    pub snapshot_file: PathBuf,

    #[arg(
        long,
        env = "OPTIMIZER_STATE_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "JSON file persisting decisions across restarts"
    )]
    pub state_file: Option<PathBuf>,

    #[arg(
        long,
        env = "OPTIMIZER_INTERVAL_SECS",
        default_value = "60",
        help = "Seconds between two optimizer cycles"
    )]
    pub interval_secs: u64,

    #[arg(
        long,
        env = "OPTIMIZER_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML file with optimizer tunables, e.g. /etc/optimizer/optimizer.yaml"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "OPTIMIZER_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/logs/optimizer-metrics.log",
        help = "Path for printing decision metrics, e.g. /logs/optimizer-metrics.log"
    )]
    pub metrics_file: Option<PathBuf>,

    #[arg(
        long,
        env = "OPTIMIZER_METRICS_FORMAT",
        default_value = "influx",
        help = "Metrics format, either 'influx' or 'json'"
    )]
    pub metrics_format: String,

    #[arg(
        long,
        env = "OPTIMIZER_METRICS_EXTRA_LABELS",
        value_parser = parse_extra_labels,
        help = "Extra tags added to every decision metric, e.g. cluster=prod,site=cern"
    )]
    pub metrics_extra_labels: Option<HashMap<String, String>>,
}

impl DaemonArgs {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Parser, Clone)]
pub struct ValidateConfigArgs {
    #[arg(
        long,
        env = "OPTIMIZER_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML file with optimizer tunables"
    )]
    pub config: PathBuf,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Snapshot file to parse as well"
    )]
    pub snapshot_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn deserialize_parameters_from_quoted_numbers() {
        let yaml = r#"
emaAlpha: "0.3"
steadyIntervalSecs: "120"
maxStreamsPerFile: "16"
lowSuccessRate: "95.5"
increaseAggressiveStep: "3"
workerPoolSize: "4"
"#;

        let params = parse_optimizer_parameters(yaml)
            .expect("should deserialize optimizer parameters with string numbers");

        assert_eq!(params.ema_alpha, 0.3, "ema_alpha should match");
        assert_eq!(params.steady_interval_secs, 120);
        assert_eq!(params.max_streams_per_file, 16);
        assert_eq!(params.low_success_rate, 95.5);
        assert_eq!(params.increase_aggressive_step, 3);
        assert_eq!(params.worker_pool_size, 4);
    }

    #[test]
    fn deserialize_parameters_from_numbers() {
        let yaml = r#"
emaAlpha: 0.5
baseSuccessRate: 90
globalMaxPerLink: 400
"#;

        let params =
            parse_optimizer_parameters(yaml).expect("should deserialize numeric parameters");

        assert_eq!(params.ema_alpha, 0.5);
        assert_eq!(params.base_success_rate, 90.0);
        assert_eq!(params.global_max_per_link, 400);
        assert_eq!(
            params.max_idle_cycles,
            OptimizerConfig::default().max_idle_cycles,
            "missing fields should use defaults"
        );
    }

    #[test]
    fn empty_document_uses_all_defaults() {
        let params = parse_optimizer_parameters("{}").expect("should deserialize empty config");

        assert_eq!(params, OptimizerParameters::default());
        assert_eq!(OptimizerConfig::from(&params), OptimizerConfig::default());
    }

    #[test]
    fn unused_success_rate_ceiling_is_ignored() {
        let params = parse_optimizer_parameters("maxSuccessRate: 100\nlowSuccessRate: 90")
            .expect("older files with maxSuccessRate should still load");

        let cfg = OptimizerConfig::from(&params);
        assert_eq!(cfg.low_success_rate, 90.0);
        assert_eq!(
            cfg,
            OptimizerConfig {
                low_success_rate: 90.0,
                ..OptimizerConfig::default()
            }
        );
    }

    #[test]
    fn rejects_unparseable_string_number() {
        let err = parse_optimizer_parameters("increaseStep: \"two\"")
            .expect_err("non-numeric string should be rejected");
        assert!(err.contains("two"), "error should name the bad value: {err}");
    }

    #[test]
    fn load_optimizer_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "decreaseStep: 2\nsteadyIntervalSecs: \"30\"").expect("write config");

        let cfg = load_optimizer_config(Some(file.path())).expect("should load config");

        assert_eq!(cfg.decrease_step, 2);
        assert_eq!(cfg.steady_interval, Duration::from_secs(30));
        assert_eq!(cfg.ema_alpha, OptimizerConfig::default().ema_alpha);
    }

    #[test]
    fn load_optimizer_config_without_file_uses_defaults() {
        let cfg = load_optimizer_config(None).expect("defaults should load");
        assert_eq!(cfg, OptimizerConfig::default());
    }

    #[test]
    fn parse_extra_labels_from_string() {
        let labels = parse_extra_labels("cluster=prod, site = cern ,,").expect("should parse");

        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("cluster").map(String::as_str), Some("prod"));
        assert_eq!(labels.get("site").map(String::as_str), Some("cern"));
    }

    #[test]
    fn parse_extra_labels_rejects_missing_value_separator() {
        assert!(parse_extra_labels("cluster").is_err());
        assert!(parse_extra_labels("=prod").is_err());
    }
}
