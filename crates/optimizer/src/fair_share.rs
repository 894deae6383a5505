//! Fair sharing of throughput ceilings between links.
//!
//! A storage endpoint or a network link is usually shared by several links.
//! When the aggregate throughput on such a resource goes over its ceiling,
//! every link using it is steered towards an equal slice of the ceiling
//! instead of being allowed to keep growing.

use std::collections::HashMap;
use std::fmt;

use crate::{NetLinkState, Pair, PairState, Range, StorageLimits, StorageState};

/// Kind of shared resource a ceiling belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Source,
    Destination,
    NetLink,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Source => write!(f, "Source"),
            ResourceKind::Destination => write!(f, "Destination"),
            ResourceKind::NetLink => write!(f, "Network link"),
        }
    }
}

/// Load of one shared resource as seen in this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUsage {
    pub kind: ResourceKind,
    pub name: String,
    pub ceiling: f64,
    pub throughput: f64,
    pub throughput_inst: f64,
    pub num_pairs: u32,
}

impl ResourceUsage {
    /// Either the sustained or the instantaneous throughput is over the ceiling.
    pub fn is_violated(&self) -> bool {
        self.ceiling > 0.0 && (self.throughput > self.ceiling || self.throughput_inst > self.ceiling)
    }
}

/// A decision imposed by a violated resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub decision: u32,
    pub resource: String,
    pub rationale: String,
}

/// Everything the enforcer reads for one link.
#[derive(Debug, Clone, Copy)]
pub struct FairShareInput<'a> {
    pub pair: &'a Pair,
    pub current: &'a PairState,
    pub limits: &'a StorageLimits,
    pub storages: &'a HashMap<String, StorageState>,
    pub net_links: &'a HashMap<String, NetLinkState>,
    pub range: Range,
    pub previous_decision: u32,
    pub increase_step: u32,
}

/// Connection count at which the link would use exactly its share of `ceiling`.
///
/// Returns `None` when the link has no per-connection throughput to divide by.
pub fn fair_share_target(ceiling: f64, num_pairs: u32, per_connection: f64) -> Option<u32> {
    let share = ceiling / f64::from(num_pairs.max(1));
    if per_connection <= 0.0 || !per_connection.is_finite() {
        return None;
    }
    let target = (share / per_connection).floor();
    Some(target.clamp(1.0, f64::from(u32::MAX)) as u32)
}

/// Shared resources traversed by the link, with their current load.
pub fn resource_usages(input: &FairShareInput<'_>) -> Vec<ResourceUsage> {
    let mut usages = Vec::with_capacity(2 + input.current.net_links.len());

    let source = input.storages.get(&input.pair.source);
    usages.push(ResourceUsage {
        kind: ResourceKind::Source,
        name: input.pair.source.clone(),
        ceiling: input.limits.throughput_source,
        throughput: source.map_or(0.0, |s| s.as_source_throughput),
        throughput_inst: source.map_or(0.0, |s| s.as_source_throughput_inst),
        num_pairs: source.map_or(0, |s| s.as_source_num_pairs),
    });

    let destination = input.storages.get(&input.pair.destination);
    usages.push(ResourceUsage {
        kind: ResourceKind::Destination,
        name: input.pair.destination.clone(),
        ceiling: input.limits.throughput_destination,
        throughput: destination.map_or(0.0, |s| s.as_dest_throughput),
        throughput_inst: destination.map_or(0.0, |s| s.as_dest_throughput_inst),
        num_pairs: destination.map_or(0, |s| s.as_dest_num_pairs),
    });

    for link in &input.current.net_links {
        if let Some(state) = input.net_links.get(link) {
            usages.push(ResourceUsage {
                kind: ResourceKind::NetLink,
                name: link.clone(),
                ceiling: state.max_throughput,
                throughput: state.throughput,
                throughput_inst: state.throughput_inst,
                num_pairs: state.num_pairs,
            });
        }
    }

    usages
}

fn constrain(input: &FairShareInput<'_>, usage: &ResourceUsage) -> Constraint {
    let previous = input.previous_decision;
    let reached = format!(
        "{} {} throughput limitation reached ({})",
        usage.kind, usage.name, usage.ceiling
    );

    let target = fair_share_target(
        usage.ceiling,
        usage.num_pairs,
        input.current.throughput_per_connection(),
    );

    let (decision, rationale) = match target {
        None => (
            i64::from(previous),
            format!("{reached}, no per-connection throughput estimate"),
        ),
        Some(target) if target > previous => (
            i64::from(previous) + i64::from(input.increase_step),
            format!("{reached}, fair share target {target} above previous, step increase"),
        ),
        Some(target) => {
            // Connections do not drop at once, so aim below the target for
            // the average over the next interval to land on it.
            let active = i64::from(input.current.active_count);
            (
                active - 2 * (active - i64::from(target)),
                format!("{reached}, fair share target {target}"),
            )
        }
    };

    Constraint {
        decision: input.range.clamp(decision),
        resource: usage.name.clone(),
        rationale,
    }
}

/// Decision imposed by the most constraining violated resource, if any.
pub fn enforce_throughput_limits(input: &FairShareInput<'_>) -> Option<Constraint> {
    resource_usages(input)
        .iter()
        .filter(|usage| usage.is_violated())
        .map(|usage| constrain(input, usage))
        .min_by_key(|constraint| constraint.decision)
}
