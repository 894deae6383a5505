//! Data source holding every metric in memory.
//!
//! Used by tests and by the daemon, which loads a [`Snapshot`] from disk
//! every cycle.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    DataSource, NetLinkState, OptimizerError, OptimizerMode, Pair, PairState, Range, Result,
    StorageLimits, StorageState, SuccessRate, TransferInfo,
};

/// Metrics and configuration of one link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PairSnapshot {
    pub source: String,
    pub destination: String,
    pub mode: OptimizerMode,
    /// Configured range, zero for unset bounds.
    pub range: Range,
    pub limits: StorageLimits,
    pub active: u32,
    pub submitted: u32,
    pub avg_duration_secs: f64,
    pub success_rate: SuccessRate,
    pub transfer: TransferInfo,
    pub net_links: Vec<String>,
}

impl PairSnapshot {
    pub fn new(pair: &Pair) -> Self {
        Self {
            source: pair.source.clone(),
            destination: pair.destination.clone(),
            ..Default::default()
        }
    }

    pub fn pair(&self) -> Pair {
        Pair::new(self.source.clone(), self.destination.clone())
    }
}

/// Everything a data source reports in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub pairs: Vec<PairSnapshot>,
    pub storages: HashMap<String, StorageState>,
    pub net_links: HashMap<String, NetLinkState>,
}

/// Audit trail entry written with every decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionAudit {
    pub pair: Pair,
    pub decision: u32,
    pub diff: i64,
    pub rationale: String,
    pub state: PairState,
}

#[derive(Debug, Default)]
struct Inner {
    pairs: HashMap<Pair, PairSnapshot>,
    storages: HashMap<String, StorageState>,
    net_links: HashMap<String, NetLinkState>,
    decisions: HashMap<Pair, u32>,
    streams: HashMap<Pair, u32>,
    audit: Vec<DecisionAudit>,
    failure: Option<String>,
    write_failure: Option<String>,
    pair_failures: HashMap<Pair, String>,
}

impl Inner {
    fn pair(&self, pair: &Pair) -> Result<&PairSnapshot> {
        if let Some(reason) = self.pair_failures.get(pair) {
            return Err(error_stack::report!(OptimizerError::data_source(reason.clone())));
        }
        self.pairs.get(pair).ok_or_else(|| {
            error_stack::report!(OptimizerError::data_source(format!("unknown pair {pair}")))
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    inner: Mutex<Inner>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let source = Self::new();
        source.replace_snapshot(snapshot)?;
        Ok(source)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.inner.lock().map_err(|_| {
            error_stack::report!(OptimizerError::data_source("in-memory data source lock poisoned"))
        })?;
        if let Some(reason) = &inner.failure {
            return Err(error_stack::report!(OptimizerError::data_source(reason.clone())));
        }
        Ok(inner)
    }

    fn lock_unchecked(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| {
            error_stack::report!(OptimizerError::data_source("in-memory data source lock poisoned"))
        })
    }

    /// Replace all metrics and configuration. Persisted decisions are kept.
    pub fn replace_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut inner = self.lock_unchecked()?;
        inner.pairs = snapshot
            .pairs
            .into_iter()
            .map(|pair| (pair.pair(), pair))
            .collect();
        inner.storages = snapshot.storages;
        inner.net_links = snapshot.net_links;
        Ok(())
    }

    pub fn set_pair(&self, snapshot: PairSnapshot) -> Result<()> {
        self.lock_unchecked()?.pairs.insert(snapshot.pair(), snapshot);
        Ok(())
    }

    /// Update the metrics of a known link in place.
    pub fn update_pair(&self, pair: &Pair, update: impl FnOnce(&mut PairSnapshot)) -> Result<()> {
        let mut inner = self.lock_unchecked()?;
        let snapshot = inner.pairs.get_mut(pair).ok_or_else(|| {
            error_stack::report!(OptimizerError::data_source(format!("unknown pair {pair}")))
        })?;
        update(snapshot);
        Ok(())
    }

    pub fn remove_pair(&self, pair: &Pair) -> Result<()> {
        self.lock_unchecked()?.pairs.remove(pair);
        Ok(())
    }

    pub fn set_storage(&self, endpoint: impl Into<String>, state: StorageState) -> Result<()> {
        self.lock_unchecked()?.storages.insert(endpoint.into(), state);
        Ok(())
    }

    pub fn set_net_link(&self, link: impl Into<String>, state: NetLinkState) -> Result<()> {
        self.lock_unchecked()?.net_links.insert(link.into(), state);
        Ok(())
    }

    /// Seed persisted decisions, e.g. from a previous run.
    pub fn load_decisions(&self, decisions: HashMap<Pair, u32>, streams: HashMap<Pair, u32>) -> Result<()> {
        let mut inner = self.lock_unchecked()?;
        inner.decisions = decisions;
        inner.streams = streams;
        Ok(())
    }

    pub fn decision(&self, pair: &Pair) -> Option<u32> {
        self.lock_unchecked().ok()?.decisions.get(pair).copied()
    }

    pub fn streams(&self, pair: &Pair) -> Option<u32> {
        self.lock_unchecked().ok()?.streams.get(pair).copied()
    }

    pub fn decisions(&self) -> Result<HashMap<Pair, u32>> {
        Ok(self.lock_unchecked()?.decisions.clone())
    }

    pub fn all_streams(&self) -> Result<HashMap<Pair, u32>> {
        Ok(self.lock_unchecked()?.streams.clone())
    }

    pub fn audit(&self) -> Result<Vec<DecisionAudit>> {
        Ok(self.lock_unchecked()?.audit.clone())
    }

    /// Make every call fail with `reason` until cleared with `None`.
    pub fn set_failure(&self, reason: Option<&str>) -> Result<()> {
        self.lock_unchecked()?.failure = reason.map(str::to_string);
        Ok(())
    }

    /// Make decision and stream writes fail with `reason` while reads keep
    /// working. Cleared with `None`.
    pub fn fail_writes(&self, reason: Option<&str>) -> Result<()> {
        self.lock_unchecked()?.write_failure = reason.map(str::to_string);
        Ok(())
    }

    fn lock_for_write(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.lock()?;
        if let Some(reason) = &inner.write_failure {
            return Err(error_stack::report!(OptimizerError::data_source(reason.clone())));
        }
        Ok(inner)
    }

    /// Make calls about `pair` fail with `reason`.
    pub fn fail_pair(&self, pair: &Pair, reason: &str) -> Result<()> {
        self.lock_unchecked()?
            .pair_failures
            .insert(pair.clone(), reason.to_string());
        Ok(())
    }
}

impl DataSource for InMemoryDataSource {
    fn get_active_pairs(&self) -> Result<Vec<Pair>> {
        let inner = self.lock()?;
        Ok(inner
            .pairs
            .iter()
            .filter(|(_, snapshot)| snapshot.active > 0 || snapshot.submitted > 0)
            .map(|(pair, _)| pair.clone())
            .collect())
    }

    fn get_storage_states(&self) -> Result<HashMap<String, StorageState>> {
        Ok(self.lock()?.storages.clone())
    }

    fn get_net_link_states(&self) -> Result<HashMap<String, NetLinkState>> {
        Ok(self.lock()?.net_links.clone())
    }

    fn get_optimizer_mode(&self, pair: &Pair) -> Result<OptimizerMode> {
        Ok(self.lock()?.pair(pair)?.mode)
    }

    fn get_pair_limits(&self, pair: &Pair) -> Result<(Range, StorageLimits)> {
        let inner = self.lock()?;
        let snapshot = inner.pair(pair)?;
        Ok((snapshot.range, snapshot.limits))
    }

    fn get_optimizer_value(&self, pair: &Pair) -> Result<u32> {
        let inner = self.lock()?;
        inner.pair(pair)?;
        Ok(inner.decisions.get(pair).copied().unwrap_or(0))
    }

    fn get_average_duration(&self, pair: &Pair, _window: Duration) -> Result<Duration> {
        let secs = self.lock()?.pair(pair)?.avg_duration_secs;
        Ok(Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
    }

    fn get_current_interval_transfer_info(
        &self,
        pair: &Pair,
        _window: Duration,
        _active_count: u32,
    ) -> Result<TransferInfo> {
        Ok(self.lock()?.pair(pair)?.transfer)
    }

    fn get_success_rate_for_pair(&self, pair: &Pair, _window: Duration) -> Result<SuccessRate> {
        Ok(self.lock()?.pair(pair)?.success_rate)
    }

    fn get_active(&self, pair: &Pair) -> Result<u32> {
        Ok(self.lock()?.pair(pair)?.active)
    }

    fn get_submitted(&self, pair: &Pair) -> Result<u32> {
        Ok(self.lock()?.pair(pair)?.submitted)
    }

    fn get_net_links(&self, pair: &Pair) -> Result<Vec<String>> {
        Ok(self.lock()?.pair(pair)?.net_links.clone())
    }

    fn store_optimizer_decision(
        &self,
        pair: &Pair,
        decision: u32,
        state: &PairState,
        diff: i64,
        rationale: &str,
    ) -> Result<()> {
        let mut inner = self.lock_for_write()?;
        inner.decisions.insert(pair.clone(), decision);
        inner.audit.push(DecisionAudit {
            pair: pair.clone(),
            decision,
            diff,
            rationale: rationale.to_string(),
            state: state.clone(),
        });
        Ok(())
    }

    fn store_optimizer_streams(&self, pair: &Pair, streams: u32) -> Result<()> {
        self.lock_for_write()?.streams.insert(pair.clone(), streams);
        Ok(())
    }
}
