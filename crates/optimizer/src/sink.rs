use serde::Serialize;

use crate::{Pair, PairState};

/// A stored decision, as handed to every [`DecisionSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub pair: Pair,
    pub decision: u32,
    pub diff: i64,
    pub streams: u32,
    pub rationale: String,
    pub state: PairState,
    pub cycle: u64,
}

/// Receives every decision after it has been persisted.
pub trait DecisionSink: Send + Sync {
    fn notify_decision(&self, record: &DecisionRecord);
}

/// Logs decisions.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DecisionSink for TracingSink {
    fn notify_decision(&self, record: &DecisionRecord) {
        tracing::info!(
            pair = %record.pair,
            decision = record.decision,
            diff = record.diff,
            streams = record.streams,
            success_rate = record.state.success_rate,
            ema = %format!("{:.2}", record.state.ema),
            queue = record.state.queue_size,
            active = record.state.active_count,
            cycle = record.cycle,
            "{}",
            record.rationale
        );
    }
}
