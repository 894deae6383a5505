//! Streams per transfer.
//!
//! Connections the queue cannot occupy with whole transfers are handed out
//! as extra TCP streams of the transfers that do run.

use crate::OptimizerMode;

/// Number of streams each transfer on a link should open.
pub fn optimize_streams(
    mode: OptimizerMode,
    decision: u32,
    queue_size: u32,
    max_streams_per_file: u32,
) -> u32 {
    let max = max_streams_per_file.max(1);
    let streams = match mode {
        OptimizerMode::Conservative => 1,
        OptimizerMode::Normal | OptimizerMode::Aggressive if queue_size >= decision => 1,
        OptimizerMode::Normal if queue_size == 0 => 1,
        OptimizerMode::Aggressive if queue_size == 0 => max,
        OptimizerMode::Normal | OptimizerMode::Aggressive => decision.div_ceil(queue_size),
    };
    streams.clamp(1, max)
}
