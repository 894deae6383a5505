use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A directed transfer link between two storage endpoints.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub source: String,
    pub destination: String,
}

impl Pair {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Both endpoints live under the same parent domain.
    pub fn is_lan_transfer(&self) -> bool {
        match (
            parent_domain(&self.source),
            parent_domain(&self.destination),
        ) {
            (Some(source), Some(destination)) => source == destination,
            _ => false,
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.source, self.destination)
    }
}

fn parent_domain(endpoint: &str) -> Option<String> {
    let url = Url::parse(endpoint).ok()?;
    let host = url.host_str()?;
    let (_, domain) = host.split_once('.')?;
    if domain.is_empty() {
        return None;
    }
    Some(domain.to_ascii_lowercase())
}

/// Optimizer aggressiveness configured for a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerMode {
    /// Never grow past what the queue can absorb, one stream per transfer.
    #[default]
    Conservative,
    Normal,
    /// Larger increase step and more streams per transfer.
    Aggressive,
}

impl OptimizerMode {
    /// Map the numeric level stored in link configuration (1..=3), saturating at both ends.
    pub fn from_level(level: i64) -> Self {
        match level {
            i64::MIN..=1 => Self::Conservative,
            2 => Self::Normal,
            _ => Self::Aggressive,
        }
    }
}

/// Per-cycle measurement of a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairState {
    pub timestamp: DateTime<Utc>,
    pub active_count: u32,
    pub queue_size: u32,
    pub avg_duration: Duration,
    /// Percentage in [0, 100] of terminal transfers that succeeded.
    pub success_rate: f64,
    pub retry_count: u32,
    /// Aggregate byte rate observed over the current window.
    pub throughput: f64,
    /// Exponentially smoothed throughput.
    pub ema: f64,
    pub filesize_avg: f64,
    pub filesize_std_dev: f64,
    /// Mean concurrency over the window, accounting for transfers that started or ended inside it.
    pub avg_active_connections: f64,
    pub net_links: Vec<String>,
    pub optimizer_decision: Option<u32>,
}

impl PairState {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            active_count: 0,
            queue_size: 0,
            avg_duration: Duration::ZERO,
            success_rate: 100.0,
            retry_count: 0,
            throughput: 0.0,
            ema: 0.0,
            filesize_avg: 0.0,
            filesize_std_dev: 0.0,
            avg_active_connections: 0.0,
            net_links: Vec::new(),
            optimizer_decision: None,
        }
    }

    /// Observed throughput carried by a single connection.
    pub fn throughput_per_connection(&self) -> f64 {
        if self.avg_active_connections > 0.0 {
            self.throughput / self.avg_active_connections
        } else {
            self.throughput
        }
    }
}

/// Working bounds for a link's decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Range {
    pub min: u32,
    pub max: u32,
    /// The range comes from configuration of this specific link.
    pub specific: bool,
    /// `max` was derived from endpoint limits instead of link configuration.
    pub storage_specific: bool,
}

impl Range {
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            max,
            ..Default::default()
        }
    }

    pub fn configured(min: u32, max: u32) -> Self {
        Self {
            min,
            max,
            specific: true,
            storage_specific: false,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    pub fn midpoint(&self) -> u32 {
        self.min + (self.max - self.min) / 2
    }

    pub fn clamp(&self, value: i64) -> u32 {
        value.clamp(i64::from(self.min), i64::from(self.max)) as u32
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.min, self.max)
    }
}

/// Ceilings of the two endpoints of a link. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageLimits {
    pub source: u32,
    pub destination: u32,
    pub throughput_source: f64,
    pub throughput_destination: f64,
}

/// Aggregate load and configured ceilings of one storage endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageState {
    pub as_source_throughput: f64,
    pub as_dest_throughput: f64,
    pub as_source_throughput_inst: f64,
    pub as_dest_throughput_inst: f64,
    pub as_source_num_pairs: u32,
    pub as_dest_num_pairs: u32,
    pub inbound_max_active: u32,
    pub outbound_max_active: u32,
    pub inbound_max_throughput: f64,
    pub outbound_max_throughput: f64,
}

impl StorageState {
    pub fn with_limits(
        inbound_max_active: u32,
        inbound_max_throughput: f64,
        outbound_max_active: u32,
        outbound_max_throughput: f64,
    ) -> Self {
        Self {
            inbound_max_active,
            inbound_max_throughput,
            outbound_max_active,
            outbound_max_throughput,
            ..Default::default()
        }
    }
}

/// Aggregate load and configured ceilings of one network link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetLinkState {
    pub throughput: f64,
    pub throughput_inst: f64,
    pub num_pairs: u32,
    pub max_throughput: f64,
    pub max_active: u32,
}

impl NetLinkState {
    pub fn with_limits(max_active: u32, max_throughput: f64) -> Self {
        Self {
            max_active,
            max_throughput,
            ..Default::default()
        }
    }
}

/// Throughput and file statistics of a link over a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferInfo {
    pub throughput: f64,
    pub filesize_avg: f64,
    pub filesize_std_dev: f64,
    pub avg_active_connections: f64,
}

/// Success percentage and retries of a link over a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessRate {
    pub rate: f64,
    pub retry_count: u32,
}

impl Default for SuccessRate {
    // No terminal transfers yet reads as fully successful, so the optimizer does not back off.
    fn default() -> Self {
        Self {
            rate: 100.0,
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn pairs_order_by_source_then_destination() {
        let mut pairs = vec![
            Pair::new("mock://b.cern.ch", "mock://a.desy.de"),
            Pair::new("mock://a.cern.ch", "mock://z.desy.de"),
            Pair::new("mock://a.cern.ch", "mock://b.desy.de"),
        ];
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                Pair::new("mock://a.cern.ch", "mock://b.desy.de"),
                Pair::new("mock://a.cern.ch", "mock://z.desy.de"),
                Pair::new("mock://b.cern.ch", "mock://a.desy.de"),
            ]
        );
    }

    #[test]
    fn lan_transfer_requires_same_parent_domain() {
        assert!(Pair::new("gsiftp://dpm.cern.ch", "srm://eos.cern.ch:8443").is_lan_transfer());
        assert!(!Pair::new("mock://dpm.cern.ch", "mock://dcache.desy.de").is_lan_transfer());
        assert!(!Pair::new("mock://localhost", "mock://localhost").is_lan_transfer());
        assert!(!Pair::new("not a url", "mock://eos.cern.ch").is_lan_transfer());
    }

    #[test]
    fn mode_levels_saturate() {
        assert_eq!(OptimizerMode::from_level(-4), OptimizerMode::Conservative);
        assert_eq!(OptimizerMode::from_level(1), OptimizerMode::Conservative);
        assert_eq!(OptimizerMode::from_level(2), OptimizerMode::Normal);
        assert_eq!(OptimizerMode::from_level(3), OptimizerMode::Aggressive);
        assert_eq!(OptimizerMode::from_level(99), OptimizerMode::Aggressive);
    }

    #[test]
    fn range_midpoint_and_clamp() {
        let range = Range::new(2, 20);
        assert_eq!(range.midpoint(), 11);
        assert_eq!(range.clamp(-3), 2);
        assert_eq!(range.clamp(25), 20);
        assert_eq!(range.clamp(7), 7);
        assert_eq!(range.to_string(), "2/20");
    }

    #[test]
    fn throughput_per_connection_falls_back_to_total() {
        let mut state = PairState::new(Utc::now());
        state.throughput = 40.0;
        assert_eq!(state.throughput_per_connection(), 40.0);
        state.avg_active_connections = 8.0;
        assert_eq!(state.throughput_per_connection(), 5.0);
    }
}
