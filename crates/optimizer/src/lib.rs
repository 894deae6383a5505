//! Connection-count optimizer for the transfer broker.
//!
//! Every cycle the optimizer looks at each active link (a source and
//! destination storage pair) and decides how many transfers may run on it
//! concurrently. The pieces, leaf first:
//! - [`ema`]: throughput smoothing and averaging-window selection
//! - [`range`]: the admissible connection range of a link
//! - [`fair_share`]: throughput ceilings shared by several links
//! - [`policy`]: the success-rate / throughput decision rules
//! - [`Optimizer`]: the cycle driver that gathers state, runs the policy for
//!   every link in a bounded worker pool and persists the results
//!
//! Metrics come from, and decisions go to, a [`DataSource`]. The only state
//! kept between cycles lives in the injected [`PairStateStore`].

use error_stack::Report;

mod backend;
mod config;
pub mod ema;
mod engine;
mod error;
pub mod fair_share;
pub mod memory;
pub mod policy;
pub mod range;
mod sink;
mod store;
pub mod streams;
mod types;

/// Result type using error-stack for context-rich error reporting
pub type Result<T, C = OptimizerError> = core::result::Result<T, Report<C>>;

pub use backend::{DataSource, SystemTimeSource, TimeSource};
pub use config::OptimizerConfig;
pub use engine::{CycleReport, Optimizer, PairOutcome};
pub use error::OptimizerError;
pub use policy::SkipReason;
pub use sink::{DecisionRecord, DecisionSink, TracingSink};
pub use store::PairStateStore;
pub use types::{
    NetLinkState, OptimizerMode, Pair, PairState, Range, StorageLimits, StorageState,
    SuccessRate, TransferInfo,
};
