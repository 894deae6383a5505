//! provides logging helpers

use std::env;
use std::path::{Path, PathBuf};

use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Environment variable naming a log file. Logs go to stderr when unset.
pub const LOG_PATH_ENV_VAR: &str = "OPTIMIZER_LOG_PATH";

const DEFAULT_LOG_PREFIX: &str = "optimizer.log";

/// Formatting layer writing to `log_path` (rotated daily) or to stderr.
pub fn get_fmt_layer<S>(log_path: Option<String>) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let Some(log_path) = log_path.map(PathBuf::from) else {
        return layer().with_writer(std::io::stderr).with_target(true).boxed();
    };

    let dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = log_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_PREFIX);

    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(7)
        .build(dir)
    {
        Ok(appender) => layer()
            .with_writer(appender)
            .with_ansi(false)
            .with_target(true)
            .boxed(),
        Err(err) => {
            eprintln!(
                "failed to create log file appender at {}: {err}; logging to stderr",
                dir.display()
            );
            layer().with_writer(std::io::stderr).with_target(true).boxed()
        }
    }
}

/// initiate the global tracing subscriber
pub fn init() {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = get_fmt_layer(env::var(LOG_PATH_ENV_VAR).ok()).with_filter(env_filter);

    registry().with(fmt_layer).init();
}
