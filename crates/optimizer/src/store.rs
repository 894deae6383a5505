use dashmap::DashMap;

use crate::{Pair, PairState};

#[derive(Debug, Clone)]
struct Entry {
    state: PairState,
    /// Cycle that wrote `state`.
    cycle: u64,
    /// Last cycle the link was active.
    last_seen: u64,
}

/// Previous-cycle state of every link, shared by the per-link workers.
///
/// Entries are tagged with the cycle that wrote them so that a slow cycle
/// can never overwrite what a newer one stored.
#[derive(Debug, Default)]
pub struct PairStateStore {
    entries: DashMap<Pair, Entry>,
}

impl PairStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pair: &Pair) -> Option<PairState> {
        self.entries.get(pair).map(|entry| entry.state.clone())
    }

    /// Cycle that last wrote the state of `pair`.
    pub fn cycle_of(&self, pair: &Pair) -> Option<u64> {
        self.entries.get(pair).map(|entry| entry.cycle)
    }

    /// Store `state` for `pair` as written by `cycle`.
    ///
    /// Returns `false`, leaving the entry untouched, if a newer cycle already
    /// wrote it.
    pub fn record(&self, pair: &Pair, state: PairState, cycle: u64) -> bool {
        match self.entries.entry(pair.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.cycle > cycle {
                    return false;
                }
                entry.state = state;
                entry.cycle = cycle;
                entry.last_seen = entry.last_seen.max(cycle);
                true
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    state,
                    cycle,
                    last_seen: cycle,
                });
                true
            }
        }
    }

    /// Mark `pair` as active in `cycle` without changing its state.
    pub fn touch(&self, pair: &Pair, cycle: u64) {
        if let Some(mut entry) = self.entries.get_mut(pair) {
            entry.last_seen = entry.last_seen.max(cycle);
        }
    }

    /// Drop links not seen for more than `max_idle_cycles` cycles before
    /// `current_cycle`. Returns how many were dropped.
    pub fn evict_idle(&self, current_cycle: u64, max_idle_cycles: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| current_cycle.saturating_sub(entry.last_seen) <= max_idle_cycles);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
