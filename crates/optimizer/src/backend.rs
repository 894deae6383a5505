use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    NetLinkState, OptimizerMode, Pair, PairState, Range, Result, StorageLimits, StorageState,
    SuccessRate, TransferInfo,
};

/// Source of transfer metrics and sink of decisions.
///
/// Every call may block on I/O. The cycle driver calls it from blocking
/// worker threads, several at a time, so implementations backed by a
/// connection pool should hand each call its own connection. Any error
/// returned here aborts the running cycle.
pub trait DataSource: Send + Sync + 'static {
    /// Called once at the start of every cycle.
    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn get_active_pairs(&self) -> Result<Vec<Pair>>;

    /// Endpoint ceilings and instantaneous load, keyed by endpoint. A `"*"`
    /// entry holds the defaults for endpoints without one.
    ///
    /// The windowed aggregates (`as_*_throughput`, `as_*_num_pairs`) are
    /// rebuilt by the optimizer from the links of each cycle. Whatever is
    /// returned for them here is ignored.
    fn get_storage_states(&self) -> Result<HashMap<String, StorageState>>;
    /// Network link ceilings and instantaneous load. `throughput` and
    /// `num_pairs` are rebuilt by the optimizer, as for storages.
    fn get_net_link_states(&self) -> Result<HashMap<String, NetLinkState>>;

    fn get_optimizer_mode(&self, pair: &Pair) -> Result<OptimizerMode>;

    /// Configured range and ceilings of a link. Unset values are zero.
    fn get_pair_limits(&self, pair: &Pair) -> Result<(Range, StorageLimits)>;

    /// Last persisted decision, 0 if none.
    fn get_optimizer_value(&self, pair: &Pair) -> Result<u32>;

    fn get_average_duration(&self, pair: &Pair, window: Duration) -> Result<Duration>;
    fn get_current_interval_transfer_info(
        &self,
        pair: &Pair,
        window: Duration,
        active_count: u32,
    ) -> Result<TransferInfo>;
    fn get_success_rate_for_pair(&self, pair: &Pair, window: Duration) -> Result<SuccessRate>;
    fn get_active(&self, pair: &Pair) -> Result<u32>;
    /// Queue depth of the link.
    fn get_submitted(&self, pair: &Pair) -> Result<u32>;
    fn get_net_links(&self, pair: &Pair) -> Result<Vec<String>>;

    /// Persist a decision together with an audit record.
    fn store_optimizer_decision(
        &self,
        pair: &Pair,
        decision: u32,
        state: &PairState,
        diff: i64,
        rationale: &str,
    ) -> Result<()>;

    fn store_optimizer_streams(&self, pair: &Pair, streams: u32) -> Result<()>;
}

/// Clock used to timestamp pair snapshots.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
