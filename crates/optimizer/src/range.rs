//! Resolution of a link's working range and endpoint ceilings.

use std::collections::HashMap;

use crate::{
    NetLinkState, OptimizerConfig, OptimizerError, Pair, Range, Result, StorageLimits, StorageState,
};

/// Storage entry whose limits apply to endpoints without an entry of their own.
pub const WILDCARD_STORAGE: &str = "*";

fn storage_entry<'a>(
    storages: &'a HashMap<String, StorageState>,
    endpoint: &str,
) -> [Option<&'a StorageState>; 2] {
    [storages.get(endpoint), storages.get(WILDCARD_STORAGE)]
}

fn first_positive<T: PartialOrd + Default + Copy>(candidates: impl IntoIterator<Item = T>) -> Option<T> {
    candidates.into_iter().find(|value| *value > T::default())
}

/// Fill the ceilings a link configuration leaves unset (zero).
///
/// Lookup order for every field: the link's own configuration, the endpoint's
/// storage entry, the `"*"` storage entry. Connection ceilings finally fall
/// back to [`OptimizerConfig::global_max_per_storage`]; throughput ceilings
/// stay unlimited.
pub fn resolve_storage_limits(
    pair: &Pair,
    configured: StorageLimits,
    storages: &HashMap<String, StorageState>,
    cfg: &OptimizerConfig,
) -> StorageLimits {
    let source = storage_entry(storages, &pair.source);
    let destination = storage_entry(storages, &pair.destination);

    let pick_active = |own: u32, entries: &[Option<&StorageState>; 2], f: fn(&StorageState) -> u32| {
        first_positive(
            std::iter::once(own)
                .chain(entries.iter().flatten().map(|s| f(s)))
                .chain(std::iter::once(cfg.global_max_per_storage)),
        )
        .unwrap_or(0)
    };
    let pick_throughput = |own: f64, entries: &[Option<&StorageState>; 2], f: fn(&StorageState) -> f64| {
        first_positive(std::iter::once(own).chain(entries.iter().flatten().map(|s| f(s)))).unwrap_or(0.0)
    };

    StorageLimits {
        source: pick_active(configured.source, &source, |s| s.outbound_max_active),
        destination: pick_active(configured.destination, &destination, |s| s.inbound_max_active),
        throughput_source: pick_throughput(configured.throughput_source, &source, |s| {
            s.outbound_max_throughput
        }),
        throughput_destination: pick_throughput(configured.throughput_destination, &destination, |s| {
            s.inbound_max_throughput
        }),
    }
}

/// Tightest connection ceiling over the network links a pair traverses.
pub fn net_link_max_active(
    net_links: &[String],
    states: &HashMap<String, NetLinkState>,
    cfg: &OptimizerConfig,
) -> Option<u32> {
    net_links
        .iter()
        .filter_map(|link| states.get(link))
        .map(|state| state.max_active)
        .filter(|max| *max > 0)
        .min()
        .or_else(|| (cfg.global_max_per_link > 0).then_some(cfg.global_max_per_link))
}

/// Working range of a link.
///
/// An unset `min` defaults to [`OptimizerConfig::default_lan_active`] for
/// links inside one site and [`OptimizerConfig::default_min_active`]
/// otherwise. An unset `max` is the tightest nonzero ceiling of the two
/// endpoints and the network links, raised to `min` if needed.
pub fn resolve_range(
    pair: &Pair,
    configured: Range,
    limits: &StorageLimits,
    link_max_active: Option<u32>,
    cfg: &OptimizerConfig,
) -> Result<Range> {
    let mut range = configured;

    if range.min == 0 {
        range.min = if pair.is_lan_transfer() {
            cfg.default_lan_active
        } else {
            cfg.default_min_active
        };
    }

    if range.max == 0 {
        range.specific = false;
        range.storage_specific = true;
        range.max = [limits.source, limits.destination, link_max_active.unwrap_or(0)]
            .into_iter()
            .filter(|max| *max > 0)
            .min()
            .unwrap_or(range.min)
            .max(range.min);
    } else {
        range.specific = true;
        range.storage_specific = false;
    }

    if range.min == 0 || range.max < range.min {
        return Err(error_stack::report!(OptimizerError::invalid_config(format!(
            "working range {range} of {pair} is empty"
        ))));
    }
    Ok(range)
}
