use std::collections::HashMap;
use std::fmt;

use optimizer::{DecisionRecord, DecisionSink};

pub mod encoders;
use encoders::create_encoder;
use encoders::DecisionMetricsParams;
use encoders::Encoder;
use encoders::MetricsEncoder as _;

/// Tracing target routed to the metrics file by the daemon's logging setup
pub const METRICS_TARGET: &str = "metrics";

// Wrapper struct for Vec<u8> that implements Display
pub struct BytesWrapper(Vec<u8>);

impl fmt::Display for BytesWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => {
                tracing::error!(msg = "Failed to convert bytes to string",);
                Err(fmt::Error)
            }
        }
    }
}

impl From<Vec<u8>> for BytesWrapper {
    fn from(bytes: Vec<u8>) -> Self {
        BytesWrapper(bytes)
    }
}

/// Emits every decision as one metrics line
pub struct MetricsSink {
    encoder: Encoder,
    extra_labels: HashMap<String, String>,
}

impl MetricsSink {
    pub fn new(format: &str, extra_labels: HashMap<String, String>) -> Self {
        Self {
            encoder: create_encoder(format),
            extra_labels,
        }
    }

    pub fn encode(&self, record: &DecisionRecord) -> String {
        self.encoder.encode_decision(&DecisionMetricsParams {
            source: &record.pair.source,
            destination: &record.pair.destination,
            decision: record.decision,
            diff: record.diff,
            streams: record.streams,
            rationale: &record.rationale,
            success_rate: record.state.success_rate,
            ema: record.state.ema,
            throughput: record.state.throughput,
            queue_size: record.state.queue_size,
            active_count: record.state.active_count,
            cycle: record.cycle,
            timestamp: record.state.timestamp.timestamp_nanos_opt().unwrap_or_default(),
            extra_labels: &self.extra_labels,
        })
    }
}

impl DecisionSink for MetricsSink {
    fn notify_decision(&self, record: &DecisionRecord) {
        let line = self.encode(record);
        tracing::info!(target: METRICS_TARGET, msg = %line);
    }
}
