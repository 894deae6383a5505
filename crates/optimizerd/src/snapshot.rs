//! File-backed data source.
//!
//! Link metrics and configuration are read from a YAML (or JSON) snapshot
//! file written by the transfer broker, reloaded at the start of every
//! cycle. Decisions and stream counts are kept in a JSON state file that is
//! rewritten after each store, so a restarted daemon sees the decisions of
//! its previous run.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use error_stack::ResultExt;
use optimizer::memory::{InMemoryDataSource, Snapshot};
use optimizer::{
    DataSource, NetLinkState, OptimizerError, OptimizerMode, Pair, PairState, Range, StorageLimits,
    StorageState, SuccessRate, TransferInfo,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse snapshot {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("failed to decode state file {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write state file {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("in-memory link store unavailable")]
    Store,
}

/// On-disk form of the persisted decisions
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    #[serde(default)]
    links: Vec<PersistedLink>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedLink {
    source: String,
    destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    streams: Option<u32>,
}

impl PersistedState {
    fn from_maps(decisions: HashMap<Pair, u32>, streams: HashMap<Pair, u32>) -> Self {
        let mut links: BTreeMap<Pair, (Option<u32>, Option<u32>)> = BTreeMap::new();
        for (pair, decision) in decisions {
            links.entry(pair).or_default().0 = Some(decision);
        }
        for (pair, count) in streams {
            links.entry(pair).or_default().1 = Some(count);
        }
        Self {
            links: links
                .into_iter()
                .map(|(pair, (decision, streams))| PersistedLink {
                    source: pair.source,
                    destination: pair.destination,
                    decision,
                    streams,
                })
                .collect(),
        }
    }

    fn into_maps(self) -> (HashMap<Pair, u32>, HashMap<Pair, u32>) {
        let mut decisions = HashMap::new();
        let mut streams = HashMap::new();
        for link in self.links {
            let pair = Pair::new(link.source, link.destination);
            if let Some(decision) = link.decision {
                decisions.insert(pair.clone(), decision);
            }
            if let Some(count) = link.streams {
                streams.insert(pair, count);
            }
        }
        (decisions, streams)
    }
}

/// Parse a snapshot file. JSON documents are accepted as YAML.
pub fn load_snapshot(path: &Path) -> error_stack::Result<Snapshot, SnapshotError> {
    let content = std::fs::read_to_string(path).map_err(|source| SnapshotError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot = serde_yaml::from_str(&content).map_err(|source| SnapshotError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(snapshot)
}

fn load_state(path: &Path) -> error_stack::Result<PersistedState, SnapshotError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no state file yet, starting without decisions");
            return Ok(PersistedState::default());
        }
        Err(source) => {
            return Err(SnapshotError::Read {
                path: path.to_path_buf(),
                source,
            }
            .into())
        }
    };
    let state = serde_json::from_str(&content).map_err(|source| SnapshotError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(state)
}

/// Write through a sibling temporary file so readers never see a partial document.
fn write_state(path: &Path, state: &PersistedState) -> error_stack::Result<(), SnapshotError> {
    let bytes = serde_json::to_vec_pretty(state).map_err(SnapshotError::Encode)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes)
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|source| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(())
}

pub struct SnapshotDataSource {
    snapshot_file: PathBuf,
    state_file: Option<PathBuf>,
    inner: InMemoryDataSource,
    persist_lock: Mutex<()>,
}

impl SnapshotDataSource {
    /// Load the snapshot and, if one exists, the state file.
    pub fn open(
        snapshot_file: impl Into<PathBuf>,
        state_file: Option<PathBuf>,
    ) -> error_stack::Result<Self, SnapshotError> {
        let snapshot_file = snapshot_file.into();
        let snapshot = load_snapshot(&snapshot_file)?;
        let inner = InMemoryDataSource::new();
        inner
            .replace_snapshot(snapshot)
            .change_context(SnapshotError::Store)?;

        if let Some(path) = &state_file {
            let (decisions, streams) = load_state(path)?.into_maps();
            tracing::info!(
                path = %path.display(),
                decisions = decisions.len(),
                "loaded persisted decisions"
            );
            inner
                .load_decisions(decisions, streams)
                .change_context(SnapshotError::Store)?;
        }

        Ok(Self {
            snapshot_file,
            state_file,
            inner,
            persist_lock: Mutex::new(()),
        })
    }

    fn persist(&self) -> optimizer::Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        // Readers of `inner` and writers of the file stay in the same order.
        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = PersistedState::from_maps(self.inner.decisions()?, self.inner.all_streams()?);
        write_state(path, &state)
            .change_context(OptimizerError::data_source("failed to persist decisions"))
    }
}

impl DataSource for SnapshotDataSource {
    fn refresh(&self) -> optimizer::Result<()> {
        let snapshot = load_snapshot(&self.snapshot_file)
            .change_context(OptimizerError::data_source("failed to reload snapshot"))?;
        tracing::debug!(
            path = %self.snapshot_file.display(),
            pairs = snapshot.pairs.len(),
            "snapshot reloaded"
        );
        self.inner.replace_snapshot(snapshot)
    }

    fn get_active_pairs(&self) -> optimizer::Result<Vec<Pair>> {
        self.inner.get_active_pairs()
    }

    fn get_storage_states(&self) -> optimizer::Result<HashMap<String, StorageState>> {
        self.inner.get_storage_states()
    }

    fn get_net_link_states(&self) -> optimizer::Result<HashMap<String, NetLinkState>> {
        self.inner.get_net_link_states()
    }

    fn get_optimizer_mode(&self, pair: &Pair) -> optimizer::Result<OptimizerMode> {
        self.inner.get_optimizer_mode(pair)
    }

    fn get_pair_limits(&self, pair: &Pair) -> optimizer::Result<(Range, StorageLimits)> {
        self.inner.get_pair_limits(pair)
    }

    fn get_optimizer_value(&self, pair: &Pair) -> optimizer::Result<u32> {
        self.inner.get_optimizer_value(pair)
    }

    fn get_average_duration(&self, pair: &Pair, window: Duration) -> optimizer::Result<Duration> {
        self.inner.get_average_duration(pair, window)
    }

    fn get_current_interval_transfer_info(
        &self,
        pair: &Pair,
        window: Duration,
        active_count: u32,
    ) -> optimizer::Result<TransferInfo> {
        self.inner
            .get_current_interval_transfer_info(pair, window, active_count)
    }

    fn get_success_rate_for_pair(
        &self,
        pair: &Pair,
        window: Duration,
    ) -> optimizer::Result<SuccessRate> {
        self.inner.get_success_rate_for_pair(pair, window)
    }

    fn get_active(&self, pair: &Pair) -> optimizer::Result<u32> {
        self.inner.get_active(pair)
    }

    fn get_submitted(&self, pair: &Pair) -> optimizer::Result<u32> {
        self.inner.get_submitted(pair)
    }

    fn get_net_links(&self, pair: &Pair) -> optimizer::Result<Vec<String>> {
        self.inner.get_net_links(pair)
    }

    fn store_optimizer_decision(
        &self,
        pair: &Pair,
        decision: u32,
        state: &PairState,
        diff: i64,
        rationale: &str,
    ) -> optimizer::Result<()> {
        self.inner
            .store_optimizer_decision(pair, decision, state, diff, rationale)?;
        self.persist()
    }

    fn store_optimizer_streams(&self, pair: &Pair, streams: u32) -> optimizer::Result<()> {
        self.inner.store_optimizer_streams(pair, streams)?;
        self.persist()
    }
}
